// ABOUTME: Secret values given literally or as references to environment variables.
// ABOUTME: Resolved at use time; Debug output never shows the secret.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl SecretValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            SecretValue::Literal(s) => Ok(s.clone()),
            SecretValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Literal(_) => f.write_str("Literal(<redacted>)"),
            SecretValue::FromEnv { var, default } => f
                .debug_struct("FromEnv")
                .field("var", var)
                .field("default", &default.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}
