// ABOUTME: Drives a deploy run through its fixed phases, one step at a time.
// ABOUTME: Skips, halts, reconnects on resume, and rolls back a target whose step fails.

use super::actions::ActionContext;
use super::cluster::ClusterOps;
use super::provision::{TargetProvisioner, TargetSession};
use super::reporter::ProgressReporter;
use super::target::{TargetRole, TargetSpec};
use super::{APT_CACHE_PORT, DeployError};
use crate::classify::Classifier;
use crate::config::LabConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::plan::{DeploymentPlan, OutlineUnit, PlanOutline, PlanState, StepDecision, TargetProgress, UnitRole};
use crate::shell::{Files, Net, Pveam, and_then};
use crate::transport::{self, ExecOptions, ExecutionTarget, Transport};
use parking_lot::Mutex;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
enum ClusterPhase {
    Swarm,
    Storage,
}

impl ClusterPhase {
    fn label(self) -> &'static str {
        match self {
            ClusterPhase::Swarm => "Set up swarm cluster",
            ClusterPhase::Storage => "Set up shared storage",
        }
    }
}

/// One deploy run over a fixed outline.
pub struct Pipeline<'a> {
    lab: &'a LabConfig,
    outline: &'a PlanOutline,
    host: &'a dyn Transport,
    provisioner: &'a dyn TargetProvisioner,
    classifier: &'a Classifier,
    diagnostics: &'a Mutex<Diagnostics>,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        lab: &'a LabConfig,
        outline: &'a PlanOutline,
        host: &'a dyn Transport,
        provisioner: &'a dyn TargetProvisioner,
        classifier: &'a Classifier,
        diagnostics: &'a Mutex<Diagnostics>,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            lab,
            outline,
            host,
            provisioner,
            classifier,
            diagnostics,
            reporter,
        }
    }

    /// Run every phase in order, advancing `plan` once per step.
    ///
    /// Returns the terminal plan state on success. On failure the plan is
    /// aborted and the error names the target and step.
    pub async fn run(&self, plan: &mut DeploymentPlan) -> Result<PlanState, DeployError> {
        self.reporter.plan(&self.outline.render(plan));
        match self.run_phases(plan).await {
            Ok(()) => Ok(plan.finish()),
            Err(e) => {
                plan.abort();
                tracing::error!(
                    step = ?e.step(),
                    kind = %e.error_kind(),
                    output = e.output_tail().unwrap_or(""),
                    "deploy aborted: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_phases(&self, plan: &mut DeploymentPlan) -> Result<(), DeployError> {
        if self.creates_from_base(plan) {
            self.ensure_base_template().await?;
        }

        let mut cache_verified = false;

        for unit in self.outline.units() {
            if plan.is_halted() {
                return Ok(());
            }
            if unit.role == UnitRole::Template && !cache_verified && unit_in_window(plan, unit) {
                self.verify_cache().await?;
                cache_verified = true;
            }
            self.run_unit(plan, unit).await?;
        }

        let cluster_steps = [
            (self.outline.cluster_step(), ClusterPhase::Swarm),
            (self.outline.storage_step(), ClusterPhase::Storage),
        ];
        for (step, phase) in cluster_steps {
            if let Some(step) = step
                && !self.cluster_step(plan, step, phase).await?
            {
                return Ok(());
            }
        }

        if plan.is_halted() || plan.is_partial() {
            self.reporter
                .note("Stopped at the requested end step; port verification skipped");
            return Ok(());
        }
        self.verify_ports().await
    }

    /// Returns `false` when the plan halted instead of reaching the step.
    async fn cluster_step(
        &self,
        plan: &mut DeploymentPlan,
        expected: u32,
        phase: ClusterPhase,
    ) -> Result<bool, DeployError> {
        let step = match plan.advance() {
            StepDecision::Halt => return Ok(false),
            StepDecision::Skip(step) => {
                self.reporter.skipped(step, phase.label());
                return Ok(true);
            }
            StepDecision::Run(step) => step,
        };
        debug_assert_eq!(step, expected);

        let mut progress = TargetProgress::new("cluster", 1);
        progress.step();
        self.reporter.step(&plan.progress_line(&progress, phase.label()));

        let ops = ClusterOps::new(self.host, self.lab, self.classifier, self.diagnostics);
        let result = match phase {
            ClusterPhase::Swarm => ops.setup_swarm().await,
            ClusterPhase::Storage => ops.setup_storage().await,
        };
        result.map_err(|source| DeployError::Cluster {
            step,
            phase: phase.label(),
            source,
        })?;
        Ok(true)
    }

    async fn run_unit(&self, plan: &mut DeploymentPlan, unit: &OutlineUnit) -> Result<(), DeployError> {
        let spec = TargetSpec::resolve(self.lab, &unit.name)
            .ok_or_else(|| DeployError::UnknownTarget(unit.name.to_string()))?;
        let mut progress = TargetProgress::new(unit.name.as_str(), unit.step_count());

        let created = match plan.advance() {
            StepDecision::Halt => return Ok(()),
            StepDecision::Skip(step) => {
                progress.step();
                self.reporter.skipped(step, &unit.creation_label());
                false
            }
            StepDecision::Run(step) => {
                progress.step();
                self.reporter
                    .step(&plan.progress_line(&progress, &unit.creation_label()));
                self.create_target(&spec, step).await?;
                true
            }
        };

        let mut session = None;
        let result = self
            .run_actions(plan, unit, &spec, &mut progress, created, &mut session)
            .await;
        if let Some(session) = session {
            self.close_session(&spec, session).await;
        }
        result?;

        let finished_here = plan.current_step() >= unit.last_step() && plan.would_run(unit.last_step());
        if spec.role == TargetRole::Template && finished_here {
            self.reporter
                .note(&format!("Archiving template '{}'", spec.name));
            if let Err(source) = self.provisioner.finalize_template(&spec).await {
                self.rollback(&spec).await;
                return Err(DeployError::Provision {
                    target: spec.name.to_string(),
                    step: unit.last_step(),
                    source,
                });
            }
        }
        Ok(())
    }

    async fn create_target(&self, spec: &TargetSpec, step: u32) -> Result<(), DeployError> {
        let created = async {
            self.provisioner.create(spec).await?;
            self.provisioner
                .wait_until_ready(spec, self.lab.waits.ready_timeout)
                .await
        }
        .await;

        if let Err(source) = created {
            tracing::error!(
                target = %spec.name,
                step,
                kind = %source.error_kind(),
                "creation failed: {}",
                source
            );
            self.rollback(spec).await;
            return Err(DeployError::Provision {
                target: spec.name.to_string(),
                step,
                source,
            });
        }
        Ok(())
    }

    async fn run_actions(
        &self,
        plan: &mut DeploymentPlan,
        unit: &OutlineUnit,
        spec: &TargetSpec,
        progress: &mut TargetProgress,
        created: bool,
        session: &mut Option<TargetSession>,
    ) -> Result<(), DeployError> {
        for action_spec in &unit.actions {
            let step = match plan.advance() {
                StepDecision::Halt => return Ok(()),
                StepDecision::Skip(step) => {
                    progress.step();
                    self.reporter.skipped(step, &action_spec.label());
                    continue;
                }
                StepDecision::Run(step) => step,
            };
            progress.step();

            if session.is_none() {
                *session = Some(self.open_session(spec, step, created).await?);
            }
            let Some(active) = session.as_ref() else {
                continue;
            };

            let action = action_spec.build();
            let description = action.description();
            self.reporter.step(&plan.progress_line(progress, &description));

            let outcome = {
                let ctx = ActionContext::new(
                    active.transport.as_ref(),
                    active.target.clone(),
                    spec,
                    self.lab,
                    self.classifier,
                    self.diagnostics,
                )
                .with_description(description.clone())
                .with_sudo(active.sudo);
                action.execute(&ctx).await
            };

            if let Err(source) = outcome {
                tracing::error!(
                    target = %spec.name,
                    step,
                    action = %description,
                    kind = %source.error_kind(),
                    output = source.output_tail().unwrap_or(""),
                    "action failed: {}",
                    source
                );
                if let Some(open) = session.take() {
                    self.close_session(spec, open).await;
                }
                self.rollback(spec).await;
                return Err(DeployError::Action {
                    target: spec.name.to_string(),
                    step,
                    action: description,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Session for the first action that runs; reconnects to an existing target on resume.
    ///
    /// A target created in this run is destroyed when no session can be opened.
    async fn open_session(
        &self,
        spec: &TargetSpec,
        step: u32,
        created: bool,
    ) -> Result<TargetSession, DeployError> {
        let opened = async {
            if !created {
                self.reporter
                    .note(&format!("Reconnecting to existing target '{}'", spec.name));
                self.provisioner.ensure_running(spec).await?;
                self.provisioner
                    .wait_until_ready(spec, self.lab.waits.ready_timeout)
                    .await?;
            }
            self.provisioner.connect(spec).await
        }
        .await;

        match opened {
            Ok(session) => Ok(session),
            Err(source) => {
                tracing::error!(
                    target = %spec.name,
                    step,
                    kind = %source.error_kind(),
                    "session failed: {}",
                    source
                );
                if created {
                    self.rollback(spec).await;
                }
                Err(DeployError::Provision {
                    target: spec.name.to_string(),
                    step,
                    source,
                })
            }
        }
    }

    async fn close_session(&self, spec: &TargetSpec, session: TargetSession) {
        if let Err(e) = session.close().await {
            self.diagnostics.lock().warn(Warning::ssh_disconnect(format!(
                "closing session to '{}' failed: {}",
                spec.name, e
            )));
        }
    }

    async fn rollback(&self, spec: &TargetSpec) {
        self.reporter
            .note(&format!("Rolling back: destroying '{}' (ct {})", spec.name, spec.vmid));
        if let Err(e) = self.provisioner.destroy(spec.vmid).await {
            self.diagnostics.lock().warn(Warning::rollback(format!(
                "could not destroy '{}' (ct {}): {}",
                spec.name, spec.vmid, e
            )));
        }
    }

    /// Whether a creation step inside the window starts from the base OS archive.
    fn creates_from_base(&self, plan: &DeploymentPlan) -> bool {
        let base = self.lab.base_template_path();
        self.outline.units().iter().any(|unit| {
            plan.would_run(unit.first_step)
                && TargetSpec::resolve(self.lab, &unit.name)
                    .is_some_and(|spec| spec.source_archive == base)
        })
    }

    /// Download the base OS archive when the host does not have it.
    async fn ensure_base_template(&self) -> Result<(), DeployError> {
        let target = ExecutionTarget::host(self.lab.host.clone());
        let path = self.lab.base_template_path();
        let present = transport::run(
            self.host,
            self.classifier,
            &target,
            &Files::exists(&path),
            ExecOptions::captured(PROBE_TIMEOUT),
        )
        .await;
        if Files::parse_exists(present.output()) {
            return Ok(());
        }

        let template = &self.lab.proxmox.base_template;
        self.reporter
            .note(&format!("Base template {template} missing, downloading"));
        let download = and_then([
            Pveam::update(),
            Pveam::download(&self.lab.proxmox.template_storage, template),
        ]);
        let result = transport::run(
            self.host,
            self.classifier,
            &target,
            &download,
            ExecOptions::streamed(self.lab.packages.silence_timeout),
        )
        .await;
        if !result.success {
            return Err(DeployError::BaseTemplate {
                template: template.clone(),
                kind: result.error_kind,
                message: result.describe(),
            });
        }
        tracing::info!(%path, "base template downloaded");
        Ok(())
    }

    async fn probe(&self, address: &str, port: u16) -> Result<(), String> {
        let target = ExecutionTarget::host(self.lab.host.clone());
        let result = transport::run(
            self.host,
            self.classifier,
            &target,
            &Net::probe_tcp(address, port),
            ExecOptions::captured(PROBE_TIMEOUT),
        )
        .await;
        if Net::parse_probe(result.output()) {
            Ok(())
        } else {
            Err(result.describe())
        }
    }

    async fn verify_cache(&self) -> Result<(), DeployError> {
        let Some(cache) = self.lab.bootstrap() else {
            return Err(DeployError::UnknownTarget(self.lab.bootstrap_cache.to_string()));
        };
        let ip = self.lab.network.ip(cache.ip_octet);
        self.probe(&ip, APT_CACHE_PORT)
            .await
            .map_err(|detail| DeployError::CacheUnreachable {
                address: format!("{ip}:{APT_CACHE_PORT}"),
                detail,
            })?;
        tracing::info!(cache = %cache.name, "bootstrap cache reachable");
        Ok(())
    }

    async fn verify_ports(&self) -> Result<(), DeployError> {
        self.reporter.note("Verifying service ports");
        let mut unreachable = Vec::new();
        for container in &self.lab.containers {
            let ip = self.lab.network.ip(container.ip_octet);
            for port in container.ports() {
                if let Err(detail) = self.probe(&ip, port).await {
                    tracing::warn!(target = %container.name, port, "port unreachable: {}", detail);
                    unreachable.push(format!("{} ({ip}:{port})", container.name));
                }
            }
        }
        if unreachable.is_empty() {
            Ok(())
        } else {
            Err(DeployError::PortsUnreachable(unreachable))
        }
    }
}

/// Whether any step of `unit` still lies ahead inside the run window.
fn unit_in_window(plan: &DeploymentPlan, unit: &OutlineUnit) -> bool {
    (unit.first_step..=unit.last_step()).any(|step| step > plan.current_step() && plan.would_run(step))
}
