// ABOUTME: Config scaffolding for new labs.
// ABOUTME: Writes a starter lab.yml describing a small swarm lab.

use std::path::Path;

use crate::error::{Error, Result};
use crate::transport::HostAddress;
use crate::types::TargetName;

use super::CONFIG_FILENAME;

pub(super) const TEMPLATE_YAML: &str = r#"name: lab
host: root@pve.local:22

ssh:
  # key_path: ~/.ssh/id_ed25519
  # Host key verification for the Proxmox host (default: false)
  # trust_first_connection: true
  connect_timeout: 10s
  silence_timeout: 5m

network:
  prefix: 10.10.10
  gateway_octet: 1
  bridge: vmbr0

proxmox:
  storage: local-lvm
  template_storage: local
  base_template: ubuntu-24.04-standard_24.04-2_amd64.tar.zst

bootstrap_cache: apt-cache

users:
  - name: lab
    password:
      env: LAB_PASSWORD

templates:
  - id: 900
    name: tmpl-docker
    type: ubuntu-docker
    ip_octet: 90

containers:
  - id: 100
    name: apt-cache
    type: apt-cache
    ip_octet: 10
  - id: 110
    name: pgsql
    type: pgsql
    ip_octet: 11
  - id: 120
    name: swarm-1
    type: swarm-manager
    ip_octet: 20
    template: tmpl-docker
  - id: 121
    name: swarm-2
    type: swarm-node
    ip_octet: 21
    template: tmpl-docker

storage:
  volume: shared
"#;

pub fn init_config(
    dir: &Path,
    name: Option<&str>,
    host: Option<&str>,
    force: bool,
) -> Result<()> {
    let config_path = dir.join(CONFIG_FILENAME);

    if config_path.exists() && !force {
        return Err(Error::AlreadyExists(config_path));
    }

    let mut yaml = TEMPLATE_YAML.to_string();

    if let Some(n) = name {
        let name = TargetName::new(n).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        yaml = yaml.replacen("name: lab\n", &format!("name: {name}\n"), 1);
    }

    if let Some(h) = host {
        let host = HostAddress::parse(h).map_err(Error::InvalidConfig)?;
        yaml = yaml.replacen("host: root@pve.local:22\n", &format!("host: {host}\n"), 1);
    }

    std::fs::write(&config_path, yaml)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::LabConfig;
    use super::*;

    #[test]
    fn starter_config_is_valid() {
        let config = LabConfig::from_yaml(TEMPLATE_YAML).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cluster_containers().count(), 2);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), None, None, false).unwrap();
        let err = init_config(dir.path(), None, None, false).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        init_config(dir.path(), None, None, true).unwrap();
    }

    #[test]
    fn init_applies_name_and_host() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("home-lab"), Some("10.0.0.5"), false).unwrap();
        let config = LabConfig::load(&dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config.name.as_str(), "home-lab");
        assert_eq!(config.host.host, "10.0.0.5");
        assert_eq!(config.host.user, "root");
    }

    #[test]
    fn init_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = init_config(dir.path(), Some("Bad_Name"), None, false).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
