// ABOUTME: Builder for systemctl service management commands.
// ABOUTME: Also interprets `systemctl is-active` output.

use super::quote;

pub struct SystemCtl {
    service: String,
}

impl SystemCtl {
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service: name.into(),
        }
    }

    fn verb(&self, verb: &str) -> String {
        format!("systemctl {verb} {} 2>&1", quote(&self.service))
    }

    pub fn enable(&self) -> String {
        self.verb("enable")
    }

    pub fn start(&self) -> String {
        self.verb("start")
    }

    pub fn restart(&self) -> String {
        self.verb("restart")
    }

    pub fn enable_now(&self) -> String {
        format!("systemctl enable --now {} 2>&1", quote(&self.service))
    }

    pub fn is_active(&self) -> String {
        self.verb("is-active")
    }

    pub fn parse_is_active(output: &str) -> bool {
        output.lines().any(|l| l.trim() == "active")
    }
}
