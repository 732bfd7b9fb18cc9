// ABOUTME: Execution targets: a host reached over SSH, optionally plus a nested container.
// ABOUTME: Parses host addresses in the "host", "user@host", "user@host:port" forms.

use crate::types::Vmid;
use serde::Deserialize;
use std::fmt;

/// User, address, and SSH port of a host-level target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: 22,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Parse `[user@]host[:port]`, using `root` when no user is given.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }

        let (user, rest) = match s.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (user, rest),
            Some(_) => return Err("user cannot be empty".to_string()),
            None => ("root", s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }

        Ok(Self::new(user, host).with_port(port))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

impl<'de> Deserialize<'de> for HostAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Entry {
            Simple(String),
            Detailed {
                host: String,
                #[serde(default = "default_user")]
                user: String,
                #[serde(default = "default_port")]
                port: u16,
            },
        }

        match Entry::deserialize(deserializer)? {
            Entry::Simple(s) => HostAddress::parse(&s).map_err(serde::de::Error::custom),
            Entry::Detailed { host, user, port } => {
                if host.is_empty() {
                    return Err(serde::de::Error::custom("hostname cannot be empty"));
                }
                Ok(HostAddress::new(user, host).with_port(port))
            }
        }
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

/// Where a command runs.
///
/// A container-level target always resolves through exactly one host hop:
/// the host is reached over SSH, the container through `pct exec` on that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTarget {
    host: HostAddress,
    container: Option<Vmid>,
}

impl ExecutionTarget {
    pub fn host(host: HostAddress) -> Self {
        Self {
            host,
            container: None,
        }
    }

    pub fn container(host: HostAddress, vmid: Vmid) -> Self {
        Self {
            host,
            container: Some(vmid),
        }
    }

    pub fn address(&self) -> &HostAddress {
        &self.host
    }

    pub fn vmid(&self) -> Option<Vmid> {
        self.container
    }

    pub fn is_nested(&self) -> bool {
        self.container.is_some()
    }

    /// The same host with the container hop removed.
    pub fn host_level(&self) -> Self {
        Self::host(self.host.clone())
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.container {
            Some(vmid) => write!(f, "{} -> ct {}", self.host, vmid),
            None => write!(f, "{}", self.host),
        }
    }
}
