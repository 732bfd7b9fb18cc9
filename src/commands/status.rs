// ABOUTME: Status command implementation.
// ABOUTME: Reports which lab containers exist, which template archives are built, and swarm state.

use super::{connect_host, disconnect_host};
use pvelab::config::LabConfig;
use pvelab::diagnostics::Diagnostics;
use pvelab::error::Result;
use pvelab::output::Output;
use pvelab::pipeline::ClusterRole;
use pvelab::shell::{Files, Pct, PctStatus, Swarm};
use pvelab::transport::{self, ExecOptions, ExecutionTarget};

pub async fn status(lab: LabConfig, output: Output) -> Result<()> {
    let classifier = lab.classifier();
    let host = connect_host(&lab, &output).await?;
    let target = ExecutionTarget::host(lab.host.clone());
    let options = ExecOptions::captured(lab.ssh.silence_timeout);

    let listed = transport::run(&host, &classifier, &target, &Pct::list(), options).await;
    let present = Pct::parse_list(listed.output());

    output.success(&format!("Lab: {} on {}", lab.name, lab.host));
    for container in &lab.containers {
        let state = if present.contains(&container.id) {
            let status = transport::run(&host, &classifier, &target, &Pct::status(container.id), options).await;
            match Pct::parse_status(status.output()) {
                PctStatus::Running => "running",
                PctStatus::Stopped => "stopped",
                PctStatus::Unknown => "unknown",
            }
        } else {
            "absent"
        };
        output.success(&format!(
            "  ct {} {:<16} {:<15} {}",
            container.id,
            container.name,
            lab.network.ip(container.ip_octet),
            state
        ));
    }

    let archives = transport::run(
        &host,
        &classifier,
        &target,
        &Files::list_matching(&lab.proxmox.template_dir, "tar.zst"),
        options,
    )
    .await;
    output.success("Templates:");
    for template in &lab.templates {
        let archive = lab.template_archive(&template.name);
        let built = archives.output().lines().any(|l| l.ends_with(&archive));
        output.success(&format!(
            "  {:<16} {}",
            template.name,
            if built { "built" } else { "missing" }
        ));
    }

    let manager = lab
        .cluster_containers()
        .find(|c| c.cluster_role() == Some(ClusterRole::Manager));
    if let Some(manager) = manager {
        let swarm = if present.contains(&manager.id) {
            let state = transport::run(
                &host,
                &classifier,
                &ExecutionTarget::container(lab.host.clone(), manager.id),
                &Swarm::state(),
                options,
            )
            .await;
            if Swarm::parse_active(state.output()) {
                "active"
            } else {
                "inactive"
            }
        } else {
            "manager absent"
        };
        output.success(&format!("Swarm ({}): {}", manager.name, swarm));
    }

    let mut diag = Diagnostics::default();
    disconnect_host(&host, &lab, &mut diag).await;
    for warning in diag.warnings() {
        output.warning(warning);
    }
    Ok(())
}
