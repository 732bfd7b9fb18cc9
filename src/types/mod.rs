// ABOUTME: Validated domain types shared across the crate.
// ABOUTME: Container ids and DNS-safe target names.

mod target_name;
mod vmid;

pub use target_name::{TargetName, TargetNameError};
pub use vmid::{MAX_VMID, MIN_VMID, Vmid, VmidError};
