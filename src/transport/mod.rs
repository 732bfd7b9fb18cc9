// ABOUTME: Runs one command against a host or a container nested in a host.
// ABOUTME: Defines the Transport seam, its options and errors, and classified execution.

mod command;
mod ssh;
mod target;

pub use command::{CommandError, QuoteKind, assemble, assemble_marked, check_quotes};
pub use ssh::{STREAM_TAIL_LINES, SshTransport};
pub use target::{ExecutionTarget, HostAddress};

use crate::classify::{Classifier, CommandResult, ErrorKind};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Default longest gap between two pieces of output.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOptions {
    /// Fail when no output arrives for this long. Total runtime is unbounded.
    pub silence_timeout: Duration,
    /// Buffer all output. When false, output is echoed live and only a tail is kept.
    pub capture: bool,
}

impl ExecOptions {
    pub fn captured(silence_timeout: Duration) -> Self {
        Self {
            silence_timeout,
            capture: true,
        }
    }

    pub fn streamed(silence_timeout: Duration) -> Self {
        Self {
            silence_timeout,
            capture: false,
        }
    }
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::captured(DEFAULT_SILENCE_TIMEOUT)
    }
}

/// What the remote side produced: interleaved stdout/stderr and the exit status if one was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub output: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("no output for {0:?}, remote command killed")]
    Timeout(Duration),

    #[error("transport is connected to {connected}, cannot reach {requested}")]
    TargetMismatch { connected: String, requested: String },

    #[error("remote execution failed: {0}")]
    Remote(String),
}

impl TransportError {
    /// Taxonomy kind this failure is reported as.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            TransportError::InvalidCommand(_) | TransportError::TargetMismatch { .. } => {
                ErrorKind::InvalidArgument
            }
            TransportError::Connection(_) => ErrorKind::ConnectionError,
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Remote(_) => ErrorKind::Unknown,
        }
    }
}

/// Executes command strings against execution targets.
///
/// Implementations own their connection and release it in [`Transport::close`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        target: &ExecutionTarget,
        command: &str,
        options: ExecOptions,
    ) -> Result<RawOutput, TransportError>;

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Execute `command` and classify the outcome. Never fails; failures become a [`CommandResult`].
pub async fn run(
    transport: &dyn Transport,
    classifier: &Classifier,
    target: &ExecutionTarget,
    command: &str,
    options: ExecOptions,
) -> CommandResult {
    match transport.execute(target, command, options).await {
        Ok(raw) => classifier.classify(Some(&raw.output), raw.exit_code),
        Err(TransportError::Timeout(after)) => {
            tracing::warn!(target = %target, "command silent for {:?}: {}", after, command);
            classifier.classify(None, None)
        }
        Err(e) => {
            tracing::debug!(target = %target, "transport failure: {}", e);
            CommandResult::failure(e.error_kind(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults_capture() {
        let opts = ExecOptions::default();
        assert!(opts.capture);
        assert_eq!(opts.silence_timeout, DEFAULT_SILENCE_TIMEOUT);
        assert!(!ExecOptions::streamed(Duration::from_secs(1)).capture);
    }

    #[test]
    fn transport_errors_map_to_kinds() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).error_kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            TransportError::Connection("refused".into()).error_kind(),
            ErrorKind::ConnectionError
        );
        assert_eq!(
            TransportError::InvalidCommand(CommandError::Empty).error_kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            TransportError::Remote("signal KILL".into()).error_kind(),
            ErrorKind::Unknown
        );
    }
}
