// ABOUTME: Configuration types and parsing for lab.yml.
// ABOUTME: Describes the hypervisor, network, containers, templates, and engine tunables.

mod init;
mod secret;

pub use init::init_config;
pub use secret::SecretValue;

use crate::classify::{Classifier, NoiseFilter};
use crate::error::{Error, Result};
use crate::package::ContentionPolicy;
use crate::pipeline::{ActionSpec, ClusterRole, ContainerKind, TemplateKind};
use crate::ssh::SessionConfig;
use crate::transport::HostAddress;
use crate::types::{TargetName, Vmid};
use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "lab.yml";
pub const CONFIG_FILENAME_ALT: &str = "lab.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".pvelab/config.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct LabConfig {
    pub name: TargetName,

    /// The Proxmox host, as `[user@]host[:port]` or a map.
    pub host: HostAddress,

    #[serde(default)]
    pub ssh: SshConfig,

    pub network: NetworkConfig,

    #[serde(default)]
    pub proxmox: ProxmoxConfig,

    /// Name of the apt cache container every other target installs through.
    #[serde(default = "default_bootstrap_cache")]
    pub bootstrap_cache: TargetName,

    /// Login users created in every container; the first is used for sessions.
    #[serde(deserialize_with = "deserialize_users")]
    pub users: NonEmpty<UserConfig>,

    #[serde(default)]
    pub containers: Vec<ContainerConfig>,

    #[serde(default)]
    pub templates: Vec<TemplateConfig>,

    #[serde(default)]
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub waits: WaitConfig,

    #[serde(default)]
    pub packages: ContentionPolicy,

    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Private key for the host and container sessions. Agent and default keys otherwise.
    pub key_path: Option<PathBuf>,
    /// Public key installed into containers. Defaults to `<key_path>.pub` or `~/.ssh/id_ed25519.pub`.
    pub public_key_path: Option<PathBuf>,
    pub trust_first_connection: bool,
    pub known_hosts_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub silence_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            public_key_path: None,
            trust_first_connection: false,
            known_hosts_path: None,
            connect_timeout: Duration::from_secs(10),
            silence_timeout: Duration::from_secs(300),
        }
    }
}

impl SshConfig {
    pub fn public_key_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.public_key_path {
            return Some(path.clone());
        }
        if let Some(key) = &self.key_path {
            let mut path = key.clone().into_os_string();
            path.push(".pub");
            return Some(PathBuf::from(path));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| Path::new(&home).join(".ssh/id_ed25519.pub"))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// First three octets of the lab subnet, e.g. `10.10.10`.
    pub prefix: String,
    #[serde(default = "default_gateway_octet")]
    pub gateway_octet: u8,
    #[serde(default = "default_bridge")]
    pub bridge: String,
}

impl NetworkConfig {
    pub fn ip(&self, octet: u8) -> String {
        format!("{}.{}", self.prefix, octet)
    }

    pub fn gateway(&self) -> String {
        self.ip(self.gateway_octet)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxmoxConfig {
    pub storage: String,
    /// Directory storage `pveam` downloads the base template into.
    pub template_storage: String,
    pub template_dir: String,
    pub dump_dir: String,
    /// Archive in `template_dir` that templates are built from.
    pub base_template: String,
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            storage: "local-lvm".to_string(),
            template_storage: "local".to_string(),
            template_dir: "/var/lib/vz/template/cache".to_string(),
            dump_dir: "/var/lib/vz/dump".to_string(),
            base_template: "ubuntu-24.04-standard_24.04-2_amd64.tar.zst".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub password: SecretValue,
    #[serde(default = "default_true")]
    pub sudo: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub cores: u32,
    pub rootfs_gb: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            swap_mb: 512,
            cores: 2,
            rootfs_gb: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    pub id: Vmid,
    pub name: TargetName,
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    /// Last octet of the container address within `network.prefix`.
    pub ip_octet: u8,
    /// Template the container is cloned from; the base template when absent.
    #[serde(default)]
    pub template: Option<TargetName>,
    #[serde(flatten)]
    pub resources: Resources,
    /// Ports checked after a full run; the type's defaults when absent.
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl ContainerConfig {
    pub fn ports(&self) -> Vec<u16> {
        self.ports
            .clone()
            .unwrap_or_else(|| self.kind.default_ports().to_vec())
    }

    pub fn cluster_role(&self) -> Option<ClusterRole> {
        self.kind.cluster_role()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    pub id: Vmid,
    pub name: TargetName,
    #[serde(rename = "type")]
    pub kind: TemplateKind,
    pub ip_octet: u8,
    #[serde(flatten)]
    pub resources: Resources,
    /// Extra actions run after the type's built-in ones.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

impl TemplateConfig {
    pub fn action_specs(&self) -> Vec<ActionSpec> {
        let mut specs = self.kind.builtin_actions();
        specs.extend(self.actions.iter().cloned());
        specs
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_volume")]
    pub volume: String,
    #[serde(default = "default_brick_dir")]
    pub brick_dir: String,
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
    /// Cluster containers holding bricks; every cluster container when empty.
    #[serde(default)]
    pub members: Vec<TargetName>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    /// Ceiling for a new container to become reachable over SSH.
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Ceiling for a template archive to appear and stop growing.
    #[serde(with = "humantime_serde")]
    pub archive_timeout: Duration,
    /// Age after which a deploy lock whose holder cannot be checked is broken.
    #[serde(with = "humantime_serde")]
    pub lock_stale_after: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(3),
            archive_timeout: Duration::from_secs(120),
            lock_stale_after: Duration::from_secs(12 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Additional line prefixes treated as benign noise.
    pub noise_prefixes: Vec<String>,
    /// Additional substrings that mark a line as benign noise.
    pub noise_substrings: Vec<String>,
    /// Use only the configured entries instead of extending the built-in list.
    pub replace_default_noise: bool,
}

impl ClassifierConfig {
    pub fn noise_filter(&self) -> NoiseFilter {
        let base = if self.replace_default_noise {
            NoiseFilter::empty()
        } else {
            NoiseFilter::default()
        };
        let with_prefixes = self
            .noise_prefixes
            .iter()
            .fold(base, |filter, p| filter.with_prefix(p));
        self.noise_substrings
            .iter()
            .fold(with_prefixes, |filter, s| filter.with_substring(s))
    }
}

fn default_bootstrap_cache() -> TargetName {
    TargetName::new("apt-cache").expect("literal is a valid target name")
}

fn default_gateway_octet() -> u8 {
    1
}

fn default_bridge() -> String {
    "vmbr0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_volume() -> String {
    "shared".to_string()
}

fn default_brick_dir() -> String {
    "/gluster/brick".to_string()
}

fn default_mount_point() -> String {
    "/mnt/shared".to_string()
}

impl LabConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Check cross-references that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        let mut octets = HashSet::new();
        let units = self
            .containers
            .iter()
            .map(|c| (c.id, &c.name, c.ip_octet))
            .chain(self.templates.iter().map(|t| (t.id, &t.name, t.ip_octet)));

        for (id, name, octet) in units {
            if !ids.insert(id) {
                return Err(invalid(format!("duplicate container id {id}")));
            }
            if !names.insert(name.as_str()) {
                return Err(invalid(format!("duplicate name {name}")));
            }
            if !(1..=254).contains(&octet) {
                return Err(invalid(format!("{name}: ip_octet {octet} is outside 1..=254")));
            }
            if octet == self.network.gateway_octet {
                return Err(invalid(format!("{name}: ip_octet {octet} is the gateway")));
            }
            if !octets.insert(octet) {
                return Err(invalid(format!("{name}: ip_octet {octet} is already in use")));
            }
        }

        if self.bootstrap().is_none() {
            return Err(invalid(format!(
                "bootstrap cache container '{}' is not defined",
                self.bootstrap_cache
            )));
        }

        for container in &self.containers {
            if let Some(template) = &container.template
                && !self.templates.iter().any(|t| &t.name == template)
            {
                return Err(invalid(format!(
                    "{}: unknown template '{}'",
                    container.name, template
                )));
            }
        }

        if let Some(storage) = &self.storage {
            for member in &storage.members {
                let is_cluster = self
                    .containers
                    .iter()
                    .any(|c| &c.name == member && c.cluster_role().is_some());
                if !is_cluster {
                    return Err(invalid(format!(
                        "storage member '{member}' is not a cluster container"
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn bootstrap(&self) -> Option<&ContainerConfig> {
        self.containers
            .iter()
            .find(|c| c.name == self.bootstrap_cache)
    }

    /// Containers that are neither the bootstrap cache nor cluster members, in declaration order.
    pub fn ordinary_containers(&self) -> impl Iterator<Item = &ContainerConfig> {
        self.containers
            .iter()
            .filter(|c| c.name != self.bootstrap_cache && c.cluster_role().is_none())
    }

    pub fn cluster_containers(&self) -> impl Iterator<Item = &ContainerConfig> {
        self.containers
            .iter()
            .filter(|c| c.name != self.bootstrap_cache && c.cluster_role().is_some())
    }

    pub fn has_cluster(&self) -> bool {
        self.cluster_containers().next().is_some()
    }

    /// Cluster containers that carry gluster bricks.
    pub fn storage_members(&self) -> Vec<&ContainerConfig> {
        match &self.storage {
            None => Vec::new(),
            Some(storage) if storage.members.is_empty() => self.cluster_containers().collect(),
            Some(storage) => self
                .cluster_containers()
                .filter(|c| storage.members.contains(&c.name))
                .collect(),
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerConfig> {
        self.containers.iter().find(|c| c.name.as_str() == name)
    }

    pub fn default_user(&self) -> &UserConfig {
        self.users.first()
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.classifier.noise_filter())
    }

    /// Path of the base OS archive on the host.
    pub fn base_template_path(&self) -> String {
        format!("{}/{}", self.proxmox.template_dir, self.proxmox.base_template)
    }

    /// Path a finished template archive is stored under.
    pub fn template_archive(&self, name: &TargetName) -> String {
        format!("{}/{}.tar.zst", self.proxmox.template_dir, name)
    }

    /// Session settings for the Proxmox host.
    pub fn host_session(&self) -> SessionConfig {
        let config = SessionConfig::new(self.host.host.clone(), self.host.user.clone())
            .port(self.host.port)
            .trust_on_first_use(self.ssh.trust_first_connection);
        self.with_common_ssh(config)
    }

    /// Session settings for a lab container, logging in as the default user.
    pub fn container_session(&self, ip: &str) -> SessionConfig {
        let config =
            SessionConfig::new(ip.to_string(), self.default_user().name.clone()).ephemeral_host(true);
        self.with_common_ssh(config)
    }

    fn with_common_ssh(&self, mut config: SessionConfig) -> SessionConfig {
        config = config
            .connect_timeout(self.ssh.connect_timeout)
            .silence_timeout(self.ssh.silence_timeout);
        if let Some(key) = &self.ssh.key_path {
            config = config.key_path(key.clone());
        }
        if let Some(known_hosts) = &self.ssh.known_hosts_path {
            config = config.known_hosts_path(known_hosts.clone());
        }
        config
    }

    pub fn template() -> Self {
        let yaml = init::TEMPLATE_YAML;
        serde_yaml::from_str(yaml).expect("starter config parses")
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig(message)
}

fn deserialize_users<'de, D>(deserializer: D) -> std::result::Result<NonEmpty<UserConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let users: Vec<UserConfig> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(users).ok_or_else(|| serde::de::Error::custom("at least one user is required"))
}

