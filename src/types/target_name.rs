// ABOUTME: DNS-compatible names for lab targets (containers, templates, the lab itself).
// ABOUTME: Enforces RFC 1123 label rules so names double as hostnames and lock file names.

use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetNameError {
    #[error("target name cannot be empty")]
    Empty,

    #[error("target name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("target name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("target name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("target name must be lowercase")]
    NotLowercase,

    #[error("invalid character in target name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(value: &str) -> Result<Self, TargetNameError> {
        if value.is_empty() {
            return Err(TargetNameError::Empty);
        }

        if value.len() > 63 {
            return Err(TargetNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(TargetNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(TargetNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(TargetNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(TargetNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for TargetName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TargetName::new(&s).map_err(serde::de::Error::custom)
    }
}
