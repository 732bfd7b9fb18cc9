// ABOUTME: Application-wide error type for pvelab.
// ABOUTME: Wraps configuration, transport, plan, and deploy failures with thiserror.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::{DeployError, ProvisionError};
use crate::plan::PlanError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
