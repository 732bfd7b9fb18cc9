// ABOUTME: Tunables for package-manager contention handling.
// ABOUTME: Wait windows, retry budget, cleanup targets, and apt source rewrites.

use serde::Deserialize;
use std::time::Duration;

/// One in-place rewrite applied to the apt sources list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRewrite {
    pub from: String,
    pub to: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl SourceRewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            delimiter: default_delimiter(),
        }
    }

    pub fn delimited(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

fn default_delimiter() -> char {
    '/'
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContentionPolicy {
    /// How long to wait for competing package managers before forcing cleanup.
    #[serde(with = "humantime_serde")]
    pub lock_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Retries after lock errors, on top of the first attempt.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub backoff: Duration,
    /// Pause after rewriting apt sources.
    #[serde(with = "humantime_serde")]
    pub fixup_delay: Duration,
    /// Silence timeout for package commands; unpacking can be quiet for minutes.
    #[serde(with = "humantime_serde")]
    pub silence_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub cleanup_timeout: Duration,
    /// Process names killed during cleanup (exact match).
    pub processes: Vec<String>,
    /// Command-line patterns killed during cleanup.
    pub patterns: Vec<String>,
    pub lock_files: Vec<String>,
    pub dpkg_log: String,
    pub sources_list: String,
    pub source_rewrites: Vec<SourceRewrite>,
    /// Lowercase output fragments that mean lock contention.
    pub lock_markers: Vec<String>,
    /// Lowercase output fragments that mean stale repository metadata.
    pub repository_markers: Vec<String>,
    /// Wrap commands in `sudo -n` for non-root logins.
    pub use_sudo: bool,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            max_retries: 6,
            backoff: Duration::from_secs(10),
            fixup_delay: Duration::from_secs(2),
            silence_timeout: Duration::from_secs(600),
            cleanup_timeout: Duration::from_secs(60),
            processes: strings(&["apt", "apt-get", "apt-cache", "dpkg", "unattended-upgrade"]),
            patterns: strings(&["unattended-upgrade", "apt.systemd.daily"]),
            lock_files: strings(&[
                "/var/lib/dpkg/lock-frontend",
                "/var/lib/dpkg/lock",
                "/var/lib/apt/lists/lock",
            ]),
            dpkg_log: "/tmp/dpkg-configure.log".to_string(),
            sources_list: "/etc/apt/sources.list".to_string(),
            source_rewrites: vec![
                SourceRewrite::new("oracular", "plucky"),
                SourceRewrite::new("old-releases.ubuntu.com", "archive.ubuntu.com").delimited('|'),
            ],
            lock_markers: strings(&[
                "could not get lock",
                "unable to lock",
                "resource temporarily unavailable",
                "is another process using it",
            ]),
            repository_markers: strings(&[
                "no longer has a release file",
                "404  not found",
                "release' no longer has",
                "oracular",
            ]),
            use_sudo: false,
        }
    }
}

impl ContentionPolicy {
    /// Policy with every wait and pause set to zero.
    pub fn immediate() -> Self {
        Self {
            lock_wait: Duration::ZERO,
            poll_interval: Duration::ZERO,
            backoff: Duration::ZERO,
            fixup_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
