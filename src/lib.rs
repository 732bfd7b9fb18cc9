// ABOUTME: Library root for pvelab - exposes the engine for the binary and tests.
// ABOUTME: The CLI lives in main.rs and commands/.

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod package;
pub mod pipeline;
pub mod plan;
pub mod shell;
pub mod ssh;
pub mod transport;
pub mod types;
