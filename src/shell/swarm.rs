// ABOUTME: Builders for Docker Swarm cluster commands and token parsing.
// ABOUTME: Used by the cluster setup step, run inside manager and worker containers.

use super::quote;

/// Role requested when asking a manager for a join token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmRole {
    Manager,
    Worker,
}

impl SwarmRole {
    fn as_str(self) -> &'static str {
        match self {
            SwarmRole::Manager => "manager",
            SwarmRole::Worker => "worker",
        }
    }
}

pub struct Swarm;

impl Swarm {
    pub fn init(advertise_addr: &str) -> String {
        format!("docker swarm init --advertise-addr {advertise_addr} 2>&1")
    }

    pub fn join_token(role: SwarmRole) -> String {
        format!("docker swarm join-token {} -q 2>&1", role.as_str())
    }

    pub fn join(token: &str, manager_addr: &str) -> String {
        format!(
            "docker swarm join --token {} {manager_addr}:2377 2>&1",
            quote(token)
        )
    }

    /// Prints `active` when this node already belongs to a swarm.
    pub fn state() -> String {
        "docker info --format '{{.Swarm.LocalNodeState}}' 2>/dev/null || echo inactive".to_string()
    }

    pub fn node_ls() -> String {
        "docker node ls 2>&1".to_string()
    }

    pub fn parse_active(output: &str) -> bool {
        output.lines().any(|l| l.trim() == "active")
    }

    /// Last non-empty line that looks like a swarm token (`SWMTKN-...`).
    pub fn parse_token(output: &str) -> Option<String> {
        output
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with("SWMTKN-"))
            .last()
            .map(str::to_string)
    }
}
