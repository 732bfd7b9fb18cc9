// ABOUTME: Turns raw command output and exit status into a structured verdict.
// ABOUTME: Exit codes alone are not trusted; output is pattern-matched and word-scanned.

mod noise;
mod patterns;

pub use noise::{DEFAULT_NOISE_PREFIXES, DEFAULT_NOISE_SUBSTRINGS, NoiseFilter};

use serde::Serialize;
use std::fmt;

const MESSAGE_LIMIT: usize = 200;

/// Closed taxonomy of command outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Timeout,
    ConnectionError,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    InvalidArgument,
    ResourceExhausted,
    CommandFailed,
    ServiceError,
    PackageError,
    NetworkError,
    Unknown,
}

impl ErrorKind {
    /// `AlreadyExists` counts as success: re-applying existing state is not a failure.
    pub fn is_success(self) -> bool {
        matches!(self, ErrorKind::None | ErrorKind::AlreadyExists)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::CommandFailed => "command_failed",
            ErrorKind::ServiceError => "service_error",
            ErrorKind::PackageError => "package_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// True exactly when `error_kind` is `None` or `AlreadyExists`.
    pub success: bool,
    /// `None` when the transport produced nothing (timeout, connection failure).
    /// `Some("")` is a successful command with no output.
    pub output: Option<String>,
    pub error_kind: ErrorKind,
    pub error_message: Option<String>,
    /// Reported status, or 0/1 synthesized from `success` when none was reported.
    pub exit_code: i32,
}

impl CommandResult {
    fn new(
        output: Option<String>,
        kind: ErrorKind,
        message: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        let success = kind.is_success();
        Self {
            success,
            output,
            error_kind: kind,
            error_message: message,
            exit_code: exit_code.unwrap_or(if success { 0 } else { 1 }),
        }
    }

    /// A failure that produced no output at all.
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(None, kind, Some(message.into()), None)
    }

    pub fn output(&self) -> &str {
        self.output.as_deref().unwrap_or("")
    }

    /// Last `lines` lines of output, for failure reports.
    pub fn output_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.output().lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }

    /// Message suitable for logs: the classified message, or the kind.
    pub fn describe(&self) -> String {
        match &self.error_message {
            Some(msg) => format!("{}: {}", self.error_kind, msg),
            None => self.error_kind.to_string(),
        }
    }
}

/// Classifies command results with a configurable noise filter.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    noise: NoiseFilter,
}

impl Classifier {
    pub fn new(noise: NoiseFilter) -> Self {
        Self { noise }
    }

    pub fn noise(&self) -> &NoiseFilter {
        &self.noise
    }

    pub fn classify(&self, output: Option<&str>, exit_code: Option<i32>) -> CommandResult {
        let Some(text) = output else {
            let (kind, msg) = match exit_code {
                None => (ErrorKind::Timeout, "command produced no output (timeout)"),
                Some(code) if code != 0 => (ErrorKind::CommandFailed, "command failed with no output"),
                Some(_) => (ErrorKind::Unknown, "command reported success but produced no output"),
            };
            return CommandResult::new(None, kind, Some(msg.to_string()), exit_code);
        };

        if text.is_empty() {
            return CommandResult::new(Some(String::new()), ErrorKind::None, None, exit_code);
        }

        let sanitized = self.noise.sanitize(text);

        let (kind, message) = match patterns::first_match(&sanitized) {
            Some(pattern) => (
                pattern.kind,
                Some(
                    matching_line(&sanitized, |line| pattern.is_match(line))
                        .unwrap_or_else(|| tail_message(&sanitized, pattern.description)),
                ),
            ),
            None => match exit_code {
                Some(code) if code != 0 => (
                    ErrorKind::CommandFailed,
                    Some(format!("command failed with exit code {code}")),
                ),
                _ => match matching_line(&sanitized, |line| patterns::FAILURE_WORDS.is_match(line)) {
                    Some(line) => (
                        ErrorKind::CommandFailed,
                        Some(format!("output contains error indicators: {line}")),
                    ),
                    None => (ErrorKind::None, None),
                },
            },
        };

        CommandResult::new(Some(text.to_string()), kind, message, exit_code)
    }
}

fn truncate(msg: &str) -> String {
    if msg.chars().count() > MESSAGE_LIMIT {
        let head: String = msg.chars().take(MESSAGE_LIMIT - 3).collect();
        format!("{head}...")
    } else {
        msg.to_string()
    }
}

fn matching_line(text: &str, is_match: impl Fn(&str) -> bool) -> Option<String> {
    text.lines()
        .find(|line| is_match(line))
        .map(|line| truncate(line.trim()))
}

fn tail_message(text: &str, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    let count = trimmed.chars().count();
    if count > MESSAGE_LIMIT {
        let tail: String = trimmed.chars().skip(count - (MESSAGE_LIMIT - 3)).collect();
        format!("...{tail}")
    } else {
        trimmed.to_string()
    }
}
