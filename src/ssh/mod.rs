// ABOUTME: SSH client module for hypervisor and container connections.
// ABOUTME: Supports SSH agent and key-based authentication with known_hosts verification.

mod auth;
mod client;
mod error;

pub use client::{Session, SessionConfig};
pub use error::{Error, Result};
