// ABOUTME: Strips ANSI escapes and drops known-benign lines before classification.
// ABOUTME: The benign line list is configurable and extends or replaces the defaults.

use regex::Regex;
use std::sync::LazyLock;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").expect("ANSI escape pattern is valid")
});

/// Lowercase line prefixes that never indicate a failure.
pub const DEFAULT_NOISE_PREFIXES: &[&str] = &[
    "logger: socket /dev/log",
    "logging to syslog failed",
    "locale:",
    "perl: warning:",
    "apparmor_parser:",
];

/// Lowercase substrings that mark a whole line as noise.
pub const DEFAULT_NOISE_SUBSTRINGS: &[&str] = &["error: at least one profile failed to load"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseFilter {
    prefixes: Vec<String>,
    substrings: Vec<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self {
            prefixes: DEFAULT_NOISE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            substrings: DEFAULT_NOISE_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NoiseFilter {
    /// A filter that only strips ANSI escapes.
    pub fn empty() -> Self {
        Self {
            prefixes: Vec::new(),
            substrings: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.prefixes.push(prefix.as_ref().to_lowercase());
        self
    }

    pub fn with_substring(mut self, substring: impl AsRef<str>) -> Self {
        self.substrings.push(substring.as_ref().to_lowercase());
        self
    }

    pub fn is_noise(&self, line: &str) -> bool {
        let lower = line.trim().to_lowercase();
        self.prefixes.iter().any(|p| lower.starts_with(p.as_str()))
            || self.substrings.iter().any(|s| lower.contains(s.as_str()))
    }

    /// Remove ANSI escapes and benign lines, keeping line structure otherwise.
    pub fn sanitize(&self, output: &str) -> String {
        output
            .lines()
            .map(|line| ANSI.replace_all(line, ""))
            .filter(|line| !self.is_noise(line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
