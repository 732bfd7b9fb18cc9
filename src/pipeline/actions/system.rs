// ABOUTME: Generic system actions: scripts, file writes, and service enablement.
// ABOUTME: Scripts and file contents travel base64-encoded.

use super::{Action, ActionContext, ActionError};
use crate::shell::{self, Files, SystemCtl, and_then};
use async_trait::async_trait;

/// Runs a multi-line bash script on the target.
pub struct RunScript {
    name: String,
    script: String,
}

impl RunScript {
    pub fn new(name: String, script: String) -> Self {
        Self { name, script }
    }
}

#[async_trait]
impl Action for RunScript {
    fn name(&self) -> &str {
        "run-script"
    }

    fn description(&self) -> String {
        format!("Run script: {}", self.name)
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        if self.script.trim().is_empty() {
            return Err(ActionError::Invalid(format!("script '{}' is empty", self.name)));
        }
        ctx.run_checked(&shell::pipe_decoded(&self.script, "bash 2>&1"))
            .await?;
        Ok(())
    }
}

pub struct WriteFile {
    path: String,
    content: String,
    mode: Option<String>,
}

impl WriteFile {
    pub fn new(path: String, content: String, mode: Option<String>) -> Self {
        Self {
            path,
            content,
            mode,
        }
    }
}

#[async_trait]
impl Action for WriteFile {
    fn name(&self) -> &str {
        "write-file"
    }

    fn description(&self) -> String {
        format!("Write file: {}", self.path)
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        if let Some(mode) = &self.mode
            && u32::from_str_radix(mode, 8).is_err()
        {
            return Err(ActionError::Invalid(format!("invalid octal mode: {mode}")));
        }

        let mut parts = vec![Files::write(&self.path, &self.content)];
        if let Some(mode) = &self.mode {
            parts.push(Files::chmod(&self.path, mode));
        }
        ctx.run_checked(&and_then(parts)).await?;
        Ok(())
    }
}

/// Enables and starts a service, then confirms it is active.
pub struct EnableService {
    service: String,
}

impl EnableService {
    pub fn new(service: String) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Action for EnableService {
    fn name(&self) -> &str {
        "enable-service"
    }

    fn description(&self) -> String {
        format!("Enable service: {}", self.service)
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        let systemctl = SystemCtl::service(&self.service);
        ctx.run_checked(&systemctl.enable_now()).await?;

        let status = ctx.run(&systemctl.is_active()).await;
        if SystemCtl::parse_is_active(status.output()) {
            Ok(())
        } else {
            Err(ActionError::Command {
                kind: crate::classify::ErrorKind::ServiceError,
                message: format!("service {} is not active after start", self.service),
                tail: status.output_tail(10),
            })
        }
    }
}
