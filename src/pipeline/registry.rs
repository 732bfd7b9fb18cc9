// ABOUTME: Static registry of container and template types keyed by their type tag.
// ABOUTME: Each tag maps to fixed traits: cluster role, LXC features, ports, built-in actions.

use super::actions::ActionSpec;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Role a container plays in the swarm cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    Manager,
    Worker,
}

/// LXC feature flags a container type needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    pub nesting: bool,
    pub keyctl: bool,
    pub fuse: bool,
}

impl Features {
    pub fn any(self) -> bool {
        self.nesting || self.keyctl || self.fuse
    }
}

const DOCKER_FEATURES: Features = Features {
    nesting: true,
    keyctl: true,
    fuse: true,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerKind {
    AptCache,
    Pgsql,
    Haproxy,
    Dns,
    SwarmManager,
    SwarmNode,
    Generic,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 7] = [
        ContainerKind::AptCache,
        ContainerKind::Pgsql,
        ContainerKind::Haproxy,
        ContainerKind::Dns,
        ContainerKind::SwarmManager,
        ContainerKind::SwarmNode,
        ContainerKind::Generic,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ContainerKind::AptCache => "apt-cache",
            ContainerKind::Pgsql => "pgsql",
            ContainerKind::Haproxy => "haproxy",
            ContainerKind::Dns => "dns",
            ContainerKind::SwarmManager => "swarm-manager",
            ContainerKind::SwarmNode => "swarm-node",
            ContainerKind::Generic => "generic",
        }
    }

    pub fn cluster_role(self) -> Option<ClusterRole> {
        match self {
            ContainerKind::SwarmManager => Some(ClusterRole::Manager),
            ContainerKind::SwarmNode => Some(ClusterRole::Worker),
            _ => None,
        }
    }

    pub fn features(self) -> Features {
        match self {
            ContainerKind::SwarmManager | ContainerKind::SwarmNode => DOCKER_FEATURES,
            _ => Features::default(),
        }
    }

    /// Swarm members run Docker, which needs a privileged container.
    pub fn privileged(self) -> bool {
        self.cluster_role().is_some()
    }

    /// Ports verified from the host after a full run.
    pub fn default_ports(self) -> &'static [u16] {
        match self {
            ContainerKind::AptCache => &[3142],
            ContainerKind::Pgsql => &[5432],
            ContainerKind::Haproxy => &[80],
            ContainerKind::Dns => &[53],
            ContainerKind::SwarmManager => &[2377],
            ContainerKind::SwarmNode | ContainerKind::Generic => &[],
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ContainerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| format!("unknown container type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateKind {
    Ubuntu,
    UbuntuDocker,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 2] = [TemplateKind::Ubuntu, TemplateKind::UbuntuDocker];

    pub fn tag(self) -> &'static str {
        match self {
            TemplateKind::Ubuntu => "ubuntu",
            TemplateKind::UbuntuDocker => "ubuntu-docker",
        }
    }

    pub fn features(self) -> Features {
        match self {
            TemplateKind::Ubuntu => Features::default(),
            TemplateKind::UbuntuDocker => DOCKER_FEATURES,
        }
    }

    /// Actions every template of this type runs before any configured extras.
    pub fn builtin_actions(self) -> Vec<ActionSpec> {
        let mut actions = vec![
            ActionSpec::ConfigureAptProxy,
            ActionSpec::UpgradePackages,
            ActionSpec::InstallPackages {
                packages: strings(&["openssh-server", "curl", "ca-certificates", "netcat-openbsd"]),
            },
        ];
        if self == TemplateKind::UbuntuDocker {
            actions.push(ActionSpec::InstallPackages {
                packages: strings(&["docker.io", "docker-compose-v2", "glusterfs-client"]),
            });
            actions.push(ActionSpec::EnableService {
                service: "docker".to_string(),
            });
        }
        actions
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == s)
            .ok_or_else(|| format!("unknown template type: {s}"))
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
