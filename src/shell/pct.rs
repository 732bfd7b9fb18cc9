// ABOUTME: Builders and output parsers for Proxmox `pct`, `pveam` and `vzdump`.
// ABOUTME: Covers container lifecycle, feature flags, listing, base downloads, and template archives.

use super::quote;
use crate::types::Vmid;

/// Parameters for `pct create`.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub vmid: Vmid,
    pub template_path: String,
    pub hostname: String,
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub cores: u32,
    pub ip_address: String,
    pub gateway: String,
    pub bridge: String,
    pub storage: String,
    pub rootfs_gb: u32,
    pub unprivileged: bool,
}

/// Run state reported by `pct status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PctStatus {
    Running,
    Stopped,
    Unknown,
}

pub struct Pct;

impl Pct {
    pub fn create(opts: &CreateOptions) -> String {
        format!(
            "pct create {id} {template} --hostname {hostname} --memory {memory} --swap {swap} \
             --cores {cores} --net0 name=eth0,bridge={bridge},firewall=1,gw={gw},ip={ip}/24,ip6=dhcp,type=veth \
             --rootfs {storage}:{rootfs} --unprivileged {unpriv} --ostype ubuntu --arch amd64 2>&1",
            id = opts.vmid,
            template = quote(&opts.template_path),
            hostname = quote(&opts.hostname),
            memory = opts.memory_mb,
            swap = opts.swap_mb,
            cores = opts.cores,
            bridge = quote(&opts.bridge),
            gw = opts.gateway,
            ip = opts.ip_address,
            storage = quote(&opts.storage),
            rootfs = opts.rootfs_gb,
            unpriv = u8::from(opts.unprivileged),
        )
    }

    pub fn start(vmid: Vmid) -> String {
        format!("pct start {vmid} 2>&1")
    }

    pub fn stop(vmid: Vmid) -> String {
        format!("pct stop {vmid} 2>&1")
    }

    pub fn status(vmid: Vmid) -> String {
        format!("pct status {vmid} 2>&1")
    }

    pub fn list() -> String {
        "pct list 2>&1".to_string()
    }

    pub fn destroy(vmid: Vmid, force: bool) -> String {
        if force {
            format!("pct destroy {vmid} --force --purge 2>&1")
        } else {
            format!("pct destroy {vmid} 2>&1")
        }
    }

    pub fn set_features(vmid: Vmid, nesting: bool, keyctl: bool, fuse: bool) -> String {
        format!(
            "pct set {vmid} --features nesting={},keyctl={},fuse={} 2>&1",
            u8::from(nesting),
            u8::from(keyctl),
            u8::from(fuse)
        )
    }

    /// Prints `exists` when the container's config file is present.
    pub fn exists(vmid: Vmid) -> String {
        format!("test -f /etc/pve/lxc/{vmid}.conf && echo exists || echo missing")
    }

    pub fn parse_exists(output: &str) -> bool {
        output.lines().any(|l| l.trim() == "exists")
    }

    pub fn parse_status(output: &str) -> PctStatus {
        let lower = output.to_lowercase();
        if lower.contains("status: running") {
            PctStatus::Running
        } else if lower.contains("status: stopped") {
            PctStatus::Stopped
        } else {
            PctStatus::Unknown
        }
    }

    /// Container ids from `pct list` output (header skipped, first column numeric).
    pub fn parse_list(output: &str) -> Vec<Vmid> {
        output
            .lines()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(|first| first.parse::<Vmid>().ok())
            .collect()
    }
}

/// Proxmox appliance template downloads.
pub struct Pveam;

impl Pveam {
    pub fn update() -> String {
        "pveam update 2>&1".to_string()
    }

    /// Download `template` into `storage` (a directory storage such as `local`).
    pub fn download(storage: &str, template: &str) -> String {
        format!("pveam download {} {} 2>&1", quote(storage), quote(template))
    }
}

pub struct Vzdump;

impl Vzdump {
    pub fn create(vmid: Vmid, dump_dir: &str) -> String {
        format!(
            "vzdump {vmid} --dumpdir {} --compress zstd --mode stop 2>&1",
            quote(dump_dir)
        )
    }

    /// Newest archive vzdump wrote for `vmid`, or nothing.
    pub fn find_archive(vmid: Vmid, dump_dir: &str) -> String {
        format!("ls -t {dump_dir}/vzdump-lxc-{vmid}-*.tar.zst 2>/dev/null | head -1")
    }

    pub fn archive_size(path: &str) -> String {
        format!("stat -c%s {} 2>/dev/null || echo 0", quote(path))
    }

    pub fn parse_size(output: &str) -> Option<u64> {
        output.trim().parse().ok()
    }
}
