// ABOUTME: Removes what a lab created on the host: its containers and its template archives.
// ABOUTME: Ids outside the lab configuration and the base OS archive are never touched.

use super::DeployError;
use super::provision::TargetProvisioner;
use crate::classify::Classifier;
use crate::config::LabConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::shell::{Files, Pct};
use crate::transport::{self, ExecOptions, ExecutionTarget, Transport};
use crate::types::Vmid;
use parking_lot::Mutex;

/// What a teardown removed and what survived it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub destroyed: Vec<Vmid>,
    pub remaining: Vec<Vmid>,
    pub archives_removed: Vec<String>,
}

pub struct Teardown<'a> {
    lab: &'a LabConfig,
    host: &'a dyn Transport,
    provisioner: &'a dyn TargetProvisioner,
    classifier: &'a Classifier,
    diagnostics: &'a Mutex<Diagnostics>,
}

impl<'a> Teardown<'a> {
    pub fn new(
        lab: &'a LabConfig,
        host: &'a dyn Transport,
        provisioner: &'a dyn TargetProvisioner,
        classifier: &'a Classifier,
        diagnostics: &'a Mutex<Diagnostics>,
    ) -> Self {
        Self {
            lab,
            host,
            provisioner,
            classifier,
            diagnostics,
        }
    }

    fn lab_ids(&self) -> Vec<Vmid> {
        self.lab
            .containers
            .iter()
            .map(|c| c.id)
            .chain(self.lab.templates.iter().map(|t| t.id))
            .collect()
    }

    /// Lab containers currently on the host. Fails when `pct list` itself fails.
    pub async fn present(&self) -> Result<Vec<Vmid>, DeployError> {
        let target = ExecutionTarget::host(self.lab.host.clone());
        let listed = transport::run(
            self.host,
            self.classifier,
            &target,
            &Pct::list(),
            ExecOptions::captured(self.lab.ssh.silence_timeout),
        )
        .await;
        if !listed.success {
            return Err(DeployError::Inventory {
                kind: listed.error_kind,
                message: listed.describe(),
            });
        }

        let lab_ids = self.lab_ids();
        Ok(Pct::parse_list(listed.output())
            .into_iter()
            .filter(|id| lab_ids.contains(id))
            .collect())
    }

    /// Destroy every lab container, verify they are gone, and delete the lab's template archives.
    ///
    /// Individual failures become warnings; only an unreadable container list aborts.
    pub async fn run(&self) -> Result<TeardownReport, DeployError> {
        let present = self.present().await?;

        for vmid in &present {
            if let Err(e) = self.provisioner.destroy(*vmid).await {
                self.diagnostics
                    .lock()
                    .warn(Warning::cleanup(format!("ct {vmid} not destroyed: {e}")));
            }
        }

        let remaining = self.present().await?;
        if !remaining.is_empty() {
            let ids: Vec<String> = remaining.iter().map(ToString::to_string).collect();
            self.diagnostics.lock().warn(Warning::cleanup(format!(
                "containers still present after cleanup: {}",
                ids.join(", ")
            )));
        }

        let archives_removed = self.remove_archives().await;
        let destroyed = present
            .into_iter()
            .filter(|id| !remaining.contains(id))
            .collect();

        Ok(TeardownReport {
            destroyed,
            remaining,
            archives_removed,
        })
    }

    async fn remove_archives(&self) -> Vec<String> {
        let target = ExecutionTarget::host(self.lab.host.clone());
        let mut removed = Vec::new();
        for template in &self.lab.templates {
            let archive = self.lab.template_archive(&template.name);
            let result = transport::run(
                self.host,
                self.classifier,
                &target,
                &Files::remove(&archive),
                ExecOptions::captured(self.lab.ssh.silence_timeout),
            )
            .await;
            if result.success {
                removed.push(archive);
            } else {
                self.diagnostics.lock().warn(Warning::cleanup(format!(
                    "template archive {archive} not removed: {}",
                    result.describe()
                )));
            }
        }
        removed
    }
}
