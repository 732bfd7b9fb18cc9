// ABOUTME: SSH-specific error types.
// ABOUTME: Covers connection, authentication, silence timeouts, and killed commands.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("no output for {0:?}, remote command killed")]
    SilenceTimeout(Duration),

    #[error("remote command terminated by signal {0}")]
    Signalled(String),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the failure happened before any command could run.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::ConnectTimeout { .. }
                | Error::AuthenticationFailed
                | Error::AgentUnavailable(_)
                | Error::KeyLoadFailed { .. }
                | Error::ChannelOpen(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
