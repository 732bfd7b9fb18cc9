// ABOUTME: Resolved description of one container or template build target.
// ABOUTME: Joins the configured unit with network, storage, and registry traits.

use super::registry::Features;
use crate::config::{ContainerConfig, LabConfig, Resources, TemplateConfig};
use crate::shell::CreateOptions;
use crate::types::{TargetName, Vmid};

/// Whether the target survives the run or is turned into a template archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRole {
    Container,
    Template,
}

/// Everything needed to create, reach, and destroy one target.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub name: TargetName,
    pub vmid: Vmid,
    pub ip: String,
    pub role: TargetRole,
    pub resources: Resources,
    pub features: Features,
    pub privileged: bool,
    /// Archive the target is created from.
    pub source_archive: String,
    pub ports: Vec<u16>,
}

impl TargetSpec {
    pub fn for_container(lab: &LabConfig, container: &ContainerConfig) -> Self {
        let source_archive = match &container.template {
            Some(template) => lab.template_archive(template),
            None => lab.base_template_path(),
        };
        Self {
            name: container.name.clone(),
            vmid: container.id,
            ip: lab.network.ip(container.ip_octet),
            role: TargetRole::Container,
            resources: container.resources,
            features: container.kind.features(),
            privileged: container.kind.privileged(),
            source_archive,
            ports: container.ports(),
        }
    }

    pub fn for_template(lab: &LabConfig, template: &TemplateConfig) -> Self {
        Self {
            name: template.name.clone(),
            vmid: template.id,
            ip: lab.network.ip(template.ip_octet),
            role: TargetRole::Template,
            resources: template.resources,
            features: template.kind.features(),
            privileged: false,
            source_archive: lab.base_template_path(),
            ports: Vec::new(),
        }
    }

    /// Look a unit up by name among containers, then templates.
    pub fn resolve(lab: &LabConfig, name: &TargetName) -> Option<Self> {
        if let Some(container) = lab.containers.iter().find(|c| &c.name == name) {
            return Some(Self::for_container(lab, container));
        }
        lab.templates
            .iter()
            .find(|t| &t.name == name)
            .map(|t| Self::for_template(lab, t))
    }

    pub fn create_options(&self, lab: &LabConfig) -> CreateOptions {
        CreateOptions {
            vmid: self.vmid,
            template_path: self.source_archive.clone(),
            hostname: self.name.to_string(),
            memory_mb: self.resources.memory_mb,
            swap_mb: self.resources.swap_mb,
            cores: self.resources.cores,
            ip_address: self.ip.clone(),
            gateway: lab.network.gateway(),
            bridge: lab.network.bridge.clone(),
            storage: lab.proxmox.storage.clone(),
            rootfs_gb: self.resources.rootfs_gb,
            unprivileged: !self.privileged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAB: &str = r#"
name: lab
host: pve
network: { prefix: 10.0.0, gateway_octet: 254 }
users: [{ name: lab, password: x }]
templates:
  - { id: 900, name: tmpl-docker, type: ubuntu-docker, ip_octet: 90 }
containers:
  - { id: 100, name: apt-cache, type: apt-cache, ip_octet: 10, memory_mb: 1024 }
  - { id: 120, name: mgr, type: swarm-manager, ip_octet: 20, template: tmpl-docker }
"#;

    fn lab() -> LabConfig {
        LabConfig::from_yaml(LAB).unwrap()
    }

    #[test]
    fn container_from_template_uses_template_archive() {
        let lab = lab();
        let spec = TargetSpec::resolve(&lab, &TargetName::new("mgr").unwrap()).unwrap();
        assert_eq!(spec.role, TargetRole::Container);
        assert_eq!(spec.ip, "10.0.0.20");
        assert_eq!(spec.source_archive, "/var/lib/vz/template/cache/tmpl-docker.tar.zst");
        assert!(spec.privileged);
        assert!(spec.features.nesting);
        assert_eq!(spec.ports, vec![2377]);
    }

    #[test]
    fn plain_container_uses_base_archive() {
        let lab = lab();
        let spec = TargetSpec::resolve(&lab, &TargetName::new("apt-cache").unwrap()).unwrap();
        assert_eq!(spec.source_archive, lab.base_template_path());
        assert_eq!(spec.resources.memory_mb, 1024);
        assert_eq!(spec.resources.cores, 2);
        let opts = spec.create_options(&lab);
        assert_eq!(opts.gateway, "10.0.0.254");
        assert!(opts.unprivileged);
    }

    #[test]
    fn templates_resolve_after_containers() {
        let lab = lab();
        let spec = TargetSpec::resolve(&lab, &TargetName::new("tmpl-docker").unwrap()).unwrap();
        assert_eq!(spec.role, TargetRole::Template);
        assert!(spec.ports.is_empty());
        assert!(TargetSpec::resolve(&lab, &TargetName::new("nope").unwrap()).is_none());
    }
}
