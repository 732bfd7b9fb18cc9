// ABOUTME: Error types for deploy runs.
// ABOUTME: Every fatal error names the target and absolute step it happened at.

use super::actions::ActionError;
use super::cluster::ClusterError;
use super::provision::ProvisionError;
use crate::classify::ErrorKind;
use chrono::{DateTime, Utc};

/// Errors that abort a deploy run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// An action returned failure.
    #[error("step {step} on '{target}' ({action}) failed: {source}")]
    Action {
        target: String,
        step: u32,
        action: String,
        source: ActionError,
    },

    /// Creating, reconnecting, or finalizing a target failed.
    #[error("step {step} on '{target}' failed: {source}")]
    Provision {
        target: String,
        step: u32,
        source: ProvisionError,
    },

    /// Swarm or shared storage setup failed.
    #[error("step {step} ({phase}) failed: {source}")]
    Cluster {
        step: u32,
        phase: &'static str,
        source: ClusterError,
    },

    /// The base OS archive is missing and could not be downloaded.
    #[error("base template {template} unavailable: {message}")]
    BaseTemplate {
        template: String,
        kind: ErrorKind,
        message: String,
    },

    /// Containers on the host could not be listed.
    #[error("cannot list containers on the host: {message}")]
    Inventory { kind: ErrorKind, message: String },

    /// Templates cannot be built without the apt cache.
    #[error("bootstrap cache {address} is not reachable: {detail}")]
    CacheUnreachable { address: String, detail: String },

    /// Service ports closed after a full run.
    #[error("unreachable service ports: {}", .0.join(", "))]
    PortsUnreachable(Vec<String>),

    /// A unit in the plan has no matching configuration.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("deploy lock held by {holder} (pid {pid}) since {started_at}")]
    LockHeld {
        holder: String,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("deploy lock error: {0}")]
    Lock(String),
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployErrorKind {
    Action,
    Provision,
    Cluster,
    Verification,
    Config,
    Lock,
}

impl DeployError {
    pub fn kind(&self) -> DeployErrorKind {
        match self {
            DeployError::Action { .. } => DeployErrorKind::Action,
            DeployError::Provision { .. } => DeployErrorKind::Provision,
            DeployError::Cluster { .. } => DeployErrorKind::Cluster,
            DeployError::BaseTemplate { .. } | DeployError::Inventory { .. } => {
                DeployErrorKind::Provision
            }
            DeployError::CacheUnreachable { .. } | DeployError::PortsUnreachable(_) => {
                DeployErrorKind::Verification
            }
            DeployError::UnknownTarget(_) => DeployErrorKind::Config,
            DeployError::LockHeld { .. } | DeployError::Lock(_) => DeployErrorKind::Lock,
        }
    }

    /// Absolute step the failure happened at, when it belongs to one.
    pub fn step(&self) -> Option<u32> {
        match self {
            DeployError::Action { step, .. }
            | DeployError::Provision { step, .. }
            | DeployError::Cluster { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn error_kind(&self) -> ErrorKind {
        match self {
            DeployError::Action { source, .. } => source.error_kind(),
            DeployError::Provision { source, .. } => source.error_kind(),
            DeployError::Cluster { source, .. } => source.error_kind(),
            DeployError::BaseTemplate { kind, .. } | DeployError::Inventory { kind, .. } => *kind,
            DeployError::CacheUnreachable { .. } | DeployError::PortsUnreachable(_) => {
                ErrorKind::NetworkError
            }
            DeployError::UnknownTarget(_) => ErrorKind::InvalidArgument,
            DeployError::LockHeld { .. } => ErrorKind::ResourceExhausted,
            DeployError::Lock(_) => ErrorKind::Unknown,
        }
    }

    /// Tail of the failing command's output, when there is one.
    pub fn output_tail(&self) -> Option<&str> {
        match self {
            DeployError::Action { source, .. } => source.output_tail(),
            DeployError::Cluster { source, .. } => source.output_tail(),
            _ => None,
        }
    }
}
