// ABOUTME: Builders for GlusterFS peer, volume, and mount commands.
// ABOUTME: Volume creation is forced so bricks may live on the root filesystem.

use super::quote;

pub struct Gluster;

impl Gluster {
    pub fn peer_probe(host: &str) -> String {
        format!("gluster peer probe {host} 2>&1")
    }

    pub fn volume_exists(volume: &str) -> String {
        format!(
            "gluster volume info {} >/dev/null 2>&1 && echo yes || echo no",
            quote(volume)
        )
    }

    pub fn parse_volume_exists(output: &str) -> bool {
        output.lines().any(|l| l.trim() == "yes")
    }

    pub fn volume_create(volume: &str, replicas: usize, bricks: &[String]) -> String {
        format!(
            "gluster volume create {} replica {replicas} {} force 2>&1",
            quote(volume),
            bricks.join(" ")
        )
    }

    pub fn volume_start(volume: &str) -> String {
        format!("gluster volume start {} 2>&1", quote(volume))
    }

    /// Add an fstab entry unless the mount point already has one, then mount.
    pub fn mount(server: &str, volume: &str, mount_point: &str) -> String {
        let source = format!("{server}:/{volume}");
        let entry = format!("{source} {mount_point} glusterfs defaults,_netdev 0 0");
        format!(
            "mkdir -p {mp} && (grep -q {mp_q} /etc/fstab || echo {entry} >> /etc/fstab) && \
             (mountpoint -q {mp} || mount -t glusterfs {source} {mp}) 2>&1",
            mp = quote(mount_point),
            mp_q = quote(&format!(" {mount_point} ")),
            entry = quote(&entry),
        )
    }
}
