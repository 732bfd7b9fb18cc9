// ABOUTME: Output formatting for CLI feedback and pipeline progress.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use serde::Serialize;
use std::time::Instant;

use crate::diagnostics::Warning;
use crate::pipeline::ProgressReporter;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress lines
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    fn emit(&self, event: &str, message: &str, step: Option<u32>) {
        let event = JsonEvent {
            event,
            message,
            step,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }

    /// Print a progress message (suppressed in quiet mode).
    pub fn progress(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => println!("{message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("progress", message, None),
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => println!("{message}"),
            OutputMode::Json => self.emit("success", message, None),
        }
    }

    /// Print a collected non-fatal warning.
    pub fn warning(&self, warning: &Warning) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {}", warning.message),
            OutputMode::Json => self.emit("warning", &warning.message, None),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => {
                let event = JsonEvent {
                    event: "error",
                    message,
                    step: None,
                    duration_secs: self.duration(),
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    eprintln!("{json}");
                }
            }
        }
    }
}

impl ProgressReporter for Output {
    fn plan(&self, listing: &str) {
        match self.mode {
            OutputMode::Normal => print!("{listing}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("plan", listing, None),
        }
    }

    fn step(&self, line: &str) {
        match self.mode {
            OutputMode::Normal => println!("{line}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("step", line, None),
        }
    }

    fn skipped(&self, step: u32, label: &str) {
        match self.mode {
            OutputMode::Normal => println!("[Step: {step}] skipped: {label}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("skipped", label, Some(step)),
        }
    }

    fn note(&self, message: &str) {
        self.progress(message);
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: JSON events omit absent step and duration
    #[test]
    fn json_event_skips_empty_fields() {
        let event = JsonEvent {
            event: "step",
            message: "hello",
            step: None,
            duration_secs: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"step","message":"hello"}"#);
    }

    /// Test: skipped steps carry their step number in JSON
    #[test]
    fn json_event_includes_step() {
        let event = JsonEvent {
            event: "skipped",
            message: "Create container 'pgsql'",
            step: Some(4),
            duration_secs: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""step":4"#));
    }
}
