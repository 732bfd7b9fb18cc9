// ABOUTME: Sink for user-facing pipeline progress.
// ABOUTME: Kept separate from tracing so progress lines stay stable for scripts and tests.

/// Receives plan listings and step progress while a pipeline runs.
pub trait ProgressReporter: Send + Sync {
    /// The plan listing printed before the first step.
    fn plan(&self, listing: &str);

    /// A `[Overall: P%] [Target 'name': Q%] [Step: N] description` line for a step that runs.
    fn step(&self, line: &str);

    /// A step below the start of the window.
    fn skipped(&self, step: u32, label: &str);

    /// Anything else worth telling the user (rollback, reconnect, verification).
    fn note(&self, message: &str);
}

/// Discards everything.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn plan(&self, _listing: &str) {}
    fn step(&self, _line: &str) {}
    fn skipped(&self, _step: u32, _label: &str) {}
    fn note(&self, _message: &str) {}
}
