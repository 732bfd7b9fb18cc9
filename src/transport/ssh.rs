// ABOUTME: Transport implementation over one russh session to a host.
// ABOUTME: Captures output fully, or echoes it live while keeping a bounded tail.

use super::{ExecOptions, ExecutionTarget, HostAddress, RawOutput, Transport, TransportError};
use crate::shell::Process;
use crate::ssh::{self, Session, SessionConfig};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lines retained for classification when output is streamed instead of captured.
pub const STREAM_TAIL_LINES: usize = 64;

const KILL_TIMEOUT: Duration = Duration::from_secs(30);

static NEXT_RUN: AtomicU64 = AtomicU64::new(1);

/// Tag unique to one command run by this process.
fn run_marker() -> String {
    format!(
        "pvelab-run-{}-{}",
        std::process::id(),
        NEXT_RUN.fetch_add(1, Ordering::Relaxed)
    )
}

pub struct SshTransport {
    address: HostAddress,
    session: Session,
    console_echo: bool,
}

impl SshTransport {
    pub async fn connect(config: SessionConfig) -> Result<Self, TransportError> {
        let address = HostAddress::new(config.user.clone(), config.host.clone()).with_port(config.port);
        let session = Session::connect(config).await.map_err(TransportError::from)?;
        Ok(Self {
            address,
            session,
            console_echo: true,
        })
    }

    /// Whether uncaptured output is copied to stdout as it arrives.
    pub fn console_echo(mut self, enabled: bool) -> Self {
        self.console_echo = enabled;
        self
    }

    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    async fn kill_marked(&self, target: &ExecutionTarget, marker: &str) {
        let kill = match super::assemble(target, &Process::kill_session(marker)) {
            Ok(kill) => kill,
            Err(e) => {
                tracing::debug!("cannot build kill command: {}", e);
                return;
            }
        };
        match self.session.exec_streaming(&kill, KILL_TIMEOUT, &mut |_: &[u8]| {}).await {
            Ok(_) => tracing::debug!(target = %target, %marker, "killed silent command"),
            Err(e) => tracing::warn!(target = %target, "could not kill silent command: {}", e),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn execute(
        &self,
        target: &ExecutionTarget,
        command: &str,
        options: ExecOptions,
    ) -> Result<RawOutput, TransportError> {
        if target.address() != &self.address {
            return Err(TransportError::TargetMismatch {
                connected: self.address.to_string(),
                requested: target.to_string(),
            });
        }

        let marker = run_marker();
        let assembled = super::assemble_marked(target, command, &marker)?;
        tracing::debug!(target = %target, %marker, "exec: {}", command);

        let mut sink = if options.capture {
            OutputSink::captured()
        } else {
            OutputSink::tail(STREAM_TAIL_LINES, self.console_echo)
        };

        let streamed = self
            .session
            .exec_streaming(&assembled, options.silence_timeout, &mut |chunk: &[u8]| {
                sink.push(chunk)
            })
            .await;
        let exit_code = match streamed {
            Ok(code) => code,
            Err(ssh::Error::SilenceTimeout(after)) => {
                // The channel signal stops at the host; pct exec children live on.
                if target.is_nested() {
                    self.kill_marked(target, &marker).await;
                }
                return Err(TransportError::Timeout(after));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(RawOutput {
            output: sink.finish(),
            exit_code: i32::try_from(exit_code).ok(),
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.session.disconnect().await.map_err(TransportError::from)
    }
}

impl From<ssh::Error> for TransportError {
    fn from(err: ssh::Error) -> Self {
        match err {
            ssh::Error::SilenceTimeout(after) => TransportError::Timeout(after),
            e if e.is_connection_failure() => TransportError::Connection(e.to_string()),
            e => TransportError::Remote(e.to_string()),
        }
    }
}

/// Collects command output for one call.
pub(crate) enum OutputSink {
    Captured(Vec<u8>),
    Tail {
        lines: VecDeque<String>,
        partial: Vec<u8>,
        limit: usize,
        echo: bool,
    },
}

impl OutputSink {
    pub(crate) fn captured() -> Self {
        OutputSink::Captured(Vec::new())
    }

    pub(crate) fn tail(limit: usize, echo: bool) -> Self {
        OutputSink::Tail {
            lines: VecDeque::with_capacity(limit),
            partial: Vec::new(),
            limit,
            echo,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        match self {
            OutputSink::Captured(buffer) => buffer.extend_from_slice(chunk),
            OutputSink::Tail {
                lines,
                partial,
                limit,
                echo,
            } => {
                if *echo {
                    let mut stdout = std::io::stdout().lock();
                    // Console echo is best effort.
                    let _ = stdout.write_all(chunk);
                    let _ = stdout.flush();
                }
                for &byte in chunk {
                    if byte == b'\n' {
                        let line = String::from_utf8_lossy(partial).into_owned();
                        partial.clear();
                        if lines.len() == *limit {
                            lines.pop_front();
                        }
                        lines.push_back(line);
                    } else {
                        partial.push(byte);
                    }
                }
            }
        }
    }

    pub(crate) fn finish(self) -> String {
        match self {
            OutputSink::Captured(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            OutputSink::Tail {
                mut lines,
                partial,
                limit,
                ..
            } => {
                if !partial.is_empty() {
                    if lines.len() == limit {
                        lines.pop_front();
                    }
                    lines.push_back(String::from_utf8_lossy(&partial).into_owned());
                }
                let mut out = lines.into_iter().collect::<Vec<_>>().join("\n");
                if !out.is_empty() && partial.is_empty() {
                    out.push('\n');
                }
                out
            }
        }
    }
}
