// ABOUTME: Action contract and the static catalogue of action types.
// ABOUTME: An ActionSpec from configuration builds a fresh Action for one target.

mod packages;
mod system;

pub use packages::{ConfigureAptProxy, InstallPackages, RemovePackages, UpgradePackages};
pub use system::{EnableService, RunScript, WriteFile};

use super::target::TargetSpec;
use crate::classify::{Classifier, CommandResult, ErrorKind};
use crate::config::LabConfig;
use crate::diagnostics::Diagnostics;
use crate::package::{ContentionPolicy, PackageError, PackageExecutor};
use crate::shell;
use crate::transport::{self, ExecOptions, ExecutionTarget, Transport};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

/// Port apt-cacher-ng listens on in the bootstrap cache.
pub const APT_CACHE_PORT: u16 = 3142;

const FAILURE_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{kind}: {message}")]
    Command {
        kind: ErrorKind,
        message: String,
        tail: String,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error("invalid action: {0}")]
    Invalid(String),
}

impl ActionError {
    pub fn from_result(result: &CommandResult) -> Self {
        ActionError::Command {
            kind: result.error_kind,
            message: result
                .error_message
                .clone()
                .unwrap_or_else(|| result.error_kind.to_string()),
            tail: result.output_tail(FAILURE_TAIL_LINES),
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ActionError::Command { kind, .. } => *kind,
            ActionError::Package(e) => e.error_kind(),
            ActionError::Invalid(_) => ErrorKind::InvalidArgument,
        }
    }

    pub fn output_tail(&self) -> Option<&str> {
        match self {
            ActionError::Command { tail, .. } if !tail.is_empty() => Some(tail),
            ActionError::Package(e) => e.output_tail(),
            _ => None,
        }
    }
}

/// A named provisioning step run against one connected target.
///
/// Actions are built fresh for each target and run at most once per run.
/// They never look at the step window; the pipeline decides whether they run.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> String;

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError>;
}

/// What an action gets to work with: a session bound to its target and the resolved configuration.
pub struct ActionContext<'a> {
    transport: &'a dyn Transport,
    target: ExecutionTarget,
    spec: &'a TargetSpec,
    lab: &'a LabConfig,
    classifier: &'a Classifier,
    diagnostics: &'a Mutex<Diagnostics>,
    policy: ContentionPolicy,
    description: String,
    sudo: bool,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        target: ExecutionTarget,
        spec: &'a TargetSpec,
        lab: &'a LabConfig,
        classifier: &'a Classifier,
        diagnostics: &'a Mutex<Diagnostics>,
    ) -> Self {
        Self {
            transport,
            target,
            spec,
            lab,
            classifier,
            diagnostics,
            policy: lab.packages.clone(),
            description: String::new(),
            sudo: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Wrap every command in `sudo -n`, for sessions logged in as a non-root user.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self.policy.use_sudo = sudo;
        self
    }

    pub fn target(&self) -> &ExecutionTarget {
        &self.target
    }

    pub fn spec(&self) -> &TargetSpec {
        self.spec
    }

    pub fn lab(&self) -> &LabConfig {
        self.lab
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run a command and classify the result.
    pub async fn run(&self, command: &str) -> CommandResult {
        let command = if self.sudo {
            shell::sudo(command)
        } else {
            command.to_string()
        };
        transport::run(
            self.transport,
            self.classifier,
            &self.target,
            &command,
            ExecOptions::captured(self.lab.ssh.silence_timeout),
        )
        .await
    }

    /// Run a command, turning a failed verdict into an error.
    pub async fn run_checked(&self, command: &str) -> Result<String, ActionError> {
        let result = self.run(command).await;
        if result.success {
            Ok(result.output().to_string())
        } else {
            Err(ActionError::from_result(&result))
        }
    }

    /// Package-manager executor bound to this target.
    pub fn packages(&self) -> PackageExecutor<'_> {
        PackageExecutor::new(self.transport, self.classifier, &self.target, &self.policy)
            .with_diagnostics(self.diagnostics)
    }

    /// apt proxy URL served by the bootstrap cache, if one is configured.
    pub fn apt_proxy_url(&self) -> Option<String> {
        self.lab
            .bootstrap()
            .map(|cache| format!("http://{}:{}", self.lab.network.ip(cache.ip_octet), APT_CACHE_PORT))
    }
}

/// Action types configurable per container or template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionSpec {
    InstallPackages {
        packages: Vec<String>,
    },
    UpgradePackages,
    RemovePackages {
        packages: Vec<String>,
    },
    RunScript {
        name: String,
        script: String,
    },
    WriteFile {
        path: String,
        content: String,
        #[serde(default)]
        mode: Option<String>,
    },
    EnableService {
        service: String,
    },
    ConfigureAptProxy,
}

impl ActionSpec {
    /// Short label for plan listings and progress lines.
    pub fn label(&self) -> String {
        match self {
            ActionSpec::InstallPackages { packages } => {
                format!("Install packages: {}", packages.join(", "))
            }
            ActionSpec::UpgradePackages => "Upgrade packages".to_string(),
            ActionSpec::RemovePackages { packages } => {
                format!("Remove packages: {}", packages.join(", "))
            }
            ActionSpec::RunScript { name, .. } => format!("Run script: {name}"),
            ActionSpec::WriteFile { path, .. } => format!("Write file: {path}"),
            ActionSpec::EnableService { service } => format!("Enable service: {service}"),
            ActionSpec::ConfigureAptProxy => "Configure apt proxy".to_string(),
        }
    }

    pub fn build(&self) -> Box<dyn Action> {
        match self.clone() {
            ActionSpec::InstallPackages { packages } => Box::new(InstallPackages::new(packages)),
            ActionSpec::UpgradePackages => Box::new(UpgradePackages),
            ActionSpec::RemovePackages { packages } => Box::new(RemovePackages::new(packages)),
            ActionSpec::RunScript { name, script } => Box::new(RunScript::new(name, script)),
            ActionSpec::WriteFile {
                path,
                content,
                mode,
            } => Box::new(WriteFile::new(path, content, mode)),
            ActionSpec::EnableService { service } => Box::new(EnableService::new(service)),
            ActionSpec::ConfigureAptProxy => Box::new(ConfigureAptProxy),
        }
    }
}
