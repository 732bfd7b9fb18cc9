// ABOUTME: Package-manager execution that survives lock contention and stale repositories.
// ABOUTME: Waits for locks, cleans up, retries with backoff; real failures fail fast.

mod policy;

pub use policy::{ContentionPolicy, SourceRewrite};

use crate::classify::{Classifier, CommandResult, ErrorKind};
use crate::diagnostics::{Diagnostics, Warning};
use crate::shell::{self, Dpkg, Files, Process, Sed};
use crate::transport::{self, ExecOptions, ExecutionTarget, Transport};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

const PROBE_HELD: &str = "locks_held";
const PROBE_CLEAR: &str = "locks_clear";
const FAILURE_TAIL_LINES: usize = 20;

/// Why a package command failed, judged from its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    Lock,
    Repository,
    Other,
}

impl Contention {
    /// Lock markers take precedence over repository markers.
    pub fn detect(output: &str, policy: &ContentionPolicy) -> Self {
        let lower = output.to_lowercase();
        if policy.lock_markers.iter().any(|m| lower.contains(m.as_str())) {
            Contention::Lock
        } else if policy
            .repository_markers
            .iter()
            .any(|m| lower.contains(m.as_str()))
        {
            Contention::Repository
        } else {
            Contention::Other
        }
    }
}

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("package manager still locked after waiting {waited:?} and forced cleanup")]
    LocksHeld { waited: Duration },

    #[error("lock probe failed: {0}")]
    Probe(String),

    #[error("still locked after {attempts} attempts: {message}")]
    LockRetriesExhausted { attempts: u32, message: String },

    #[error("repository error persists after source fix-up: {message}")]
    Repository { message: String },

    #[error("{kind}: {message}")]
    Failed {
        kind: ErrorKind,
        message: String,
        tail: String,
    },
}

impl PackageError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            PackageError::LocksHeld { .. } | PackageError::LockRetriesExhausted { .. } => {
                ErrorKind::ResourceExhausted
            }
            PackageError::Probe(_) => ErrorKind::ConnectionError,
            PackageError::Repository { .. } => ErrorKind::PackageError,
            PackageError::Failed { kind, .. } => *kind,
        }
    }

    /// Raw output tail of the failing command, when there was one.
    pub fn output_tail(&self) -> Option<&str> {
        match self {
            PackageError::Failed { tail, .. } if !tail.is_empty() => Some(tail),
            _ => None,
        }
    }

    fn failed(result: &CommandResult) -> Self {
        PackageError::Failed {
            kind: result.error_kind,
            message: result
                .error_message
                .clone()
                .unwrap_or_else(|| result.error_kind.to_string()),
            tail: result.output_tail(FAILURE_TAIL_LINES),
        }
    }
}

/// Runs package commands against one target under a [`ContentionPolicy`].
pub struct PackageExecutor<'a> {
    transport: &'a dyn Transport,
    classifier: &'a Classifier,
    target: &'a ExecutionTarget,
    policy: &'a ContentionPolicy,
    diagnostics: Option<&'a Mutex<Diagnostics>>,
}

impl<'a> PackageExecutor<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        classifier: &'a Classifier,
        target: &'a ExecutionTarget,
        policy: &'a ContentionPolicy,
    ) -> Self {
        Self {
            transport,
            classifier,
            target,
            policy,
            diagnostics: None,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: &'a Mutex<Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Run `command` with the policy's retry budget and backoff.
    pub async fn execute(&self, command: &str) -> Result<String, PackageError> {
        self.execute_with_retry(command, self.policy.max_retries, self.policy.backoff)
            .await
    }

    /// Wait for locks, run `command`, and recover from contention.
    ///
    /// Lock errors trigger cleanup, a `backoff` pause, and a retry, at most
    /// `max_retries` times. A repository error triggers one source fix-up and
    /// one retry; a second repository error is final. Anything else is
    /// returned immediately.
    pub async fn execute_with_retry(
        &self,
        command: &str,
        max_retries: u32,
        backoff: Duration,
    ) -> Result<String, PackageError> {
        self.wait_for_locks().await?;

        let wrapped = self.wrap(command);
        let mut lock_retries = 0;
        let mut sources_fixed = false;

        loop {
            let result = self
                .run(&wrapped, ExecOptions::captured(self.policy.silence_timeout))
                .await;
            if result.success {
                return Ok(result.output().to_string());
            }

            match Contention::detect(result.output(), self.policy) {
                Contention::Lock if lock_retries < max_retries => {
                    lock_retries += 1;
                    tracing::warn!(
                        target = %self.target,
                        "lock contention running {} (retry {}/{}), cleaning up",
                        program(command),
                        lock_retries,
                        max_retries
                    );
                    self.cleanup().await;
                    tokio::time::sleep(backoff).await;
                }
                Contention::Lock => {
                    return Err(PackageError::LockRetriesExhausted {
                        attempts: lock_retries + 1,
                        message: result.describe(),
                    });
                }
                Contention::Repository if !sources_fixed => {
                    tracing::warn!(
                        target = %self.target,
                        "repository error running {}, fixing apt sources",
                        program(command)
                    );
                    self.fix_sources().await;
                    sources_fixed = true;
                    tokio::time::sleep(self.policy.fixup_delay).await;
                }
                Contention::Repository => {
                    tracing::error!(
                        target = %self.target,
                        "repository error persists after fix-up: {}",
                        result.output_tail(FAILURE_TAIL_LINES)
                    );
                    return Err(PackageError::Repository {
                        message: result.describe(),
                    });
                }
                Contention::Other => {
                    tracing::error!(
                        target = %self.target,
                        "{} failed: {}",
                        program(command),
                        result.describe()
                    );
                    return Err(PackageError::failed(&result));
                }
            }
        }
    }

    /// Block until no competing package manager runs and no lock file is held.
    ///
    /// When the wait window expires, cleanup is forced and the wait repeats once.
    pub async fn wait_for_locks(&self) -> Result<(), PackageError> {
        if self.poll_until_clear().await? {
            return Ok(());
        }

        tracing::warn!(
            target = %self.target,
            "package manager busy for {:?}, forcing cleanup",
            self.policy.lock_wait
        );
        self.cleanup().await;

        if self.poll_until_clear().await? {
            Ok(())
        } else {
            Err(PackageError::LocksHeld {
                waited: self.policy.lock_wait,
            })
        }
    }

    async fn poll_until_clear(&self) -> Result<bool, PackageError> {
        let deadline = Instant::now() + self.policy.lock_wait;
        loop {
            if self.locks_clear().await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tracing::debug!(target = %self.target, "package manager busy, waiting");
            tokio::time::sleep(self.policy.poll_interval.min(deadline - now)).await;
        }
    }

    async fn locks_clear(&self) -> Result<bool, PackageError> {
        let command = self.wrap(&self.probe_command());
        let result = self
            .run(&command, ExecOptions::captured(self.policy.cleanup_timeout))
            .await;
        let output = result.output();
        if output.contains(PROBE_CLEAR) {
            Ok(true)
        } else if output.contains(PROBE_HELD) {
            Ok(false)
        } else {
            Err(PackageError::Probe(result.describe()))
        }
    }

    /// Kill competing processes, remove lock files, and finish pending dpkg work.
    ///
    /// Every part tolerates failure, so running it again is harmless.
    pub async fn cleanup(&self) {
        let command = self.wrap(&self.cleanup_command());
        let result = self
            .run(&command, ExecOptions::captured(self.policy.cleanup_timeout))
            .await;
        if !result.output().contains("apt_cleanup_done") {
            tracing::warn!(target = %self.target, "lock cleanup incomplete: {}", result.describe());
        }
    }

    async fn fix_sources(&self) {
        for (index, rewrite) in self.policy.source_rewrites.iter().enumerate() {
            let sed = Sed::replace(
                &self.policy.sources_list,
                &rewrite.from,
                &rewrite.to,
                rewrite.delimiter,
            );
            let result = self
                .run(&self.wrap(&sed), ExecOptions::captured(self.policy.cleanup_timeout))
                .await;
            if result.exit_code != 0 {
                let message = format!(
                    "apt source fix-up step {} on {} failed: {}",
                    index + 1,
                    self.target,
                    result.describe()
                );
                match self.diagnostics {
                    Some(diagnostics) => diagnostics.lock().warn(Warning::source_fixup(message)),
                    None => tracing::warn!("{}", message),
                }
            }
        }
    }

    pub fn probe_command(&self) -> String {
        let checks: Vec<String> = self
            .policy
            .processes
            .iter()
            .map(|name| Process::running_named(name))
            .chain(self.policy.patterns.iter().map(|p| Process::running_matching(p)))
            .chain(self.policy.lock_files.iter().map(|f| Dpkg::lock_held(f)))
            .collect();
        if checks.is_empty() {
            return format!("echo {PROBE_CLEAR}");
        }
        format!(
            "if {}; then echo {PROBE_HELD}; else echo {PROBE_CLEAR}; fi",
            checks.join(" || ")
        )
    }

    pub fn cleanup_command(&self) -> String {
        let parts = self
            .policy
            .processes
            .iter()
            .map(|name| Process::kill_named(name))
            .chain(self.policy.patterns.iter().map(|p| Process::kill_matching(p)))
            .chain(self.policy.lock_files.iter().map(|f| Files::remove(f)))
            .chain([
                Dpkg::configure_pending(&self.policy.dpkg_log),
                "echo apt_cleanup_done".to_string(),
            ]);
        shell::and_then(parts)
    }

    fn wrap(&self, command: &str) -> String {
        if self.policy.use_sudo {
            shell::sudo(command)
        } else {
            command.to_string()
        }
    }

    async fn run(&self, command: &str, options: ExecOptions) -> CommandResult {
        transport::run(self.transport, self.classifier, self.target, command, options).await
    }
}

fn program(command: &str) -> &str {
    command
        .split_whitespace()
        .find(|word| !word.contains('='))
        .unwrap_or(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_lock_contention() {
        let policy = ContentionPolicy::default();
        let output = "E: Could not get lock /var/lib/dpkg/lock-frontend. It is held by process 4242 (apt)";
        assert_eq!(Contention::detect(output, &policy), Contention::Lock);
        assert_eq!(
            Contention::detect("E: Unable to acquire the dpkg frontend lock, is another process using it?", &policy),
            Contention::Lock
        );
    }

    #[test]
    fn detects_repository_errors() {
        let policy = ContentionPolicy::default();
        let output = "E: The repository 'http://archive.ubuntu.com/ubuntu oracular Release' no longer has a Release file.";
        assert_eq!(Contention::detect(output, &policy), Contention::Repository);
        assert_eq!(
            Contention::detect("Err:5 http://x/ubuntu noble/main amd64 Packages\n  404  Not Found [IP: 1.2.3.4 80]", &policy),
            Contention::Repository
        );
    }

    #[test]
    fn everything_else_is_other() {
        let policy = ContentionPolicy::default();
        assert_eq!(
            Contention::detect("E: Unable to locate package nope", &policy),
            Contention::Other
        );
        assert_eq!(Contention::detect("", &policy), Contention::Other);
    }

    #[test]
    fn program_skips_env_assignments() {
        assert_eq!(
            program("DEBIAN_FRONTEND=noninteractive apt-get install -y curl"),
            "apt-get"
        );
        assert_eq!(program("dpkg -l"), "dpkg");
    }

    #[test]
    fn package_error_kinds() {
        assert_eq!(
            PackageError::LocksHeld { waited: Duration::ZERO }.error_kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            PackageError::Repository { message: String::new() }.error_kind(),
            ErrorKind::PackageError
        );
    }
}
