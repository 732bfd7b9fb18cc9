// ABOUTME: Proxmox container identifier (VMID) with range validation.
// ABOUTME: Serializes as a plain integer so it round-trips through lab.yml.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lowest VMID Proxmox hands out; 0-99 are reserved.
pub const MIN_VMID: u32 = 100;
pub const MAX_VMID: u32 = 999_999_999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VmidError {
    #[error("container id {0} is outside the valid range {MIN_VMID}-{MAX_VMID}")]
    OutOfRange(u32),

    #[error("container id is not a number: '{0}'")]
    NotANumber(String),
}

/// A Proxmox VMID identifying one LXC container on the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vmid(u32);

impl Vmid {
    pub fn new(value: u32) -> Result<Self, VmidError> {
        if !(MIN_VMID..=MAX_VMID).contains(&value) {
            return Err(VmidError::OutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl FromStr for Vmid {
    type Err = VmidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|_| VmidError::NotANumber(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for Vmid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Vmid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for Vmid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u32::deserialize(deserializer)?;
        Vmid::new(value).map_err(serde::de::Error::custom)
    }
}
