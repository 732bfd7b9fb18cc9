// ABOUTME: Deploy pipeline: target catalogue, actions, provisioning, cluster steps, runner, teardown.
// ABOUTME: Exports the Pipeline driver and the seams tests substitute (TargetProvisioner, ProgressReporter).

pub mod actions;
mod cluster;
mod error;
mod lock;
mod provision;
mod registry;
mod reporter;
mod runner;
mod target;
mod teardown;

pub use actions::{APT_CACHE_PORT, Action, ActionContext, ActionError, ActionSpec};
pub use cluster::{ClusterError, ClusterOps};
pub use error::{DeployError, DeployErrorKind};
pub use lock::{DeployLock, LockInfo};
pub use provision::{
    PctProvisioner, ProvisionError, ProvisionErrorKind, TargetProvisioner, TargetSession,
};
pub use registry::{ClusterRole, ContainerKind, Features, TemplateKind};
pub use reporter::{ProgressReporter, SilentReporter};
pub use runner::Pipeline;
pub use target::{TargetRole, TargetSpec};
pub use teardown::{Teardown, TeardownReport};
