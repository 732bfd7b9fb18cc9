// ABOUTME: Ordered pattern table mapping command output to error kinds.
// ABOUTME: Regexes are compiled once; the first matching entry wins.

use super::ErrorKind;
use regex::Regex;
use std::sync::LazyLock;

pub(crate) struct Pattern {
    pub kind: ErrorKind,
    pub description: &'static str,
    regex: Regex,
    /// A match immediately preceded by one of these is ignored.
    excluded_prefixes: &'static [&'static str],
}

impl Pattern {
    fn new(kind: ErrorKind, description: &'static str, source: &str) -> Self {
        Self::excluding(kind, description, source, &[])
    }

    fn excluding(
        kind: ErrorKind,
        description: &'static str,
        source: &str,
        excluded_prefixes: &'static [&'static str],
    ) -> Self {
        let regex = Regex::new(&format!("(?i){source}")).expect("built-in pattern is valid");
        Self {
            kind,
            description,
            regex,
            excluded_prefixes,
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.find_iter(text).any(|m| {
            let before = text[..m.start()].to_lowercase();
            !self
                .excluded_prefixes
                .iter()
                .any(|prefix| before.ends_with(prefix))
        })
    }
}

const SYSLOG_PREFIXES: &[&str] = &["logger: socket ", "syslog: ", "journal: "];

pub(crate) static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    use ErrorKind::*;
    vec![
        Pattern::new(Timeout, "Command timed out", r"timeout|timed out|time out"),
        Pattern::excluding(
            ConnectionError,
            "Connection error",
            r"connection (?:refused|reset|closed|failed)|unable to connect|cannot connect|connection error",
            SYSLOG_PREFIXES,
        ),
        Pattern::new(
            ConnectionError,
            "SSH connection error",
            r"ssh.*connection.*refused|ssh.*connection.*closed",
        ),
        Pattern::new(
            PermissionDenied,
            "Permission denied",
            r"permission denied|access denied|operation not permitted|eacces",
        ),
        Pattern::new(
            NotFound,
            "Resource not found",
            r"not found|no such file|no such directory|command not found",
        ),
        Pattern::new(
            NotFound,
            "Container not found",
            r"container.*not found|container.*does not exist",
        ),
        Pattern::new(
            AlreadyExists,
            "Resource already exists",
            r"already exists|already in use|already running|already part",
        ),
        Pattern::new(
            InvalidArgument,
            "Invalid argument",
            r"invalid (?:argument|option|parameter)|bad argument|unknown option",
        ),
        Pattern::new(
            ResourceExhausted,
            "Resource exhausted",
            r"no space left|disk full|out of memory|resource.*unavailable",
        ),
        Pattern::new(
            ServiceError,
            "Service error",
            r"service.*failed|service.*error|systemctl.*failed|failed to start.*service",
        ),
        Pattern::new(
            ServiceError,
            "Service operation failed",
            r"failed to start|failed to stop|failed to restart",
        ),
        Pattern::new(
            PackageError,
            "Package error",
            r"package.*not found|unable to locate package|package.*unavailable",
        ),
        Pattern::new(
            PackageError,
            "APT package error",
            r"(?m)^e:\s*(?:unable to|package|error)",
        ),
        Pattern::new(
            PackageError,
            "Package fetch error",
            r"failed to fetch|unable to fetch|404 not found.*package",
        ),
        Pattern::new(
            NetworkError,
            "Network error",
            r"network.*error|network.*unreachable|no route to host",
        ),
        Pattern::new(
            NetworkError,
            "HTTP connection error",
            r"failed to fetch.*http|unable to connect.*http",
        ),
        Pattern::new(
            CommandFailed,
            "Command failed",
            r"\bfatal\b|traceback \(most recent call last\)|core dumped|segmentation fault",
        ),
    ]
});

/// Bare failure words that override a clean exit status.
pub(crate) static FAILURE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:error|failed|failure)\b").expect("failure word pattern is valid")
});

/// First pattern that matches `text`, in table order.
pub(crate) fn first_match(text: &str) -> Option<&'static Pattern> {
    PATTERNS.iter().find(|p| p.is_match(text))
}
