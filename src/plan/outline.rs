// ABOUTME: Precomputed step layout of a lab: units, their actions, and the cluster steps.
// ABOUTME: Built once from configuration so step numbers stay stable between runs.

use super::{DeploymentPlan, PlanError, Result};
use crate::config::LabConfig;
use crate::pipeline::ActionSpec;
use crate::types::TargetName;
use std::fmt::Write;

/// Phase a unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRole {
    BootstrapCache,
    Template,
    Container,
    ClusterMember,
}

/// One container or template: a creation step followed by one step per action.
#[derive(Debug, Clone)]
pub struct OutlineUnit {
    pub name: TargetName,
    pub role: UnitRole,
    pub actions: Vec<ActionSpec>,
    /// Step number of the creation step.
    pub first_step: u32,
}

impl OutlineUnit {
    pub fn step_count(&self) -> u32 {
        1 + self.actions.len() as u32
    }

    pub fn last_step(&self) -> u32 {
        self.first_step + self.step_count() - 1
    }

    pub fn creation_label(&self) -> String {
        match self.role {
            UnitRole::Template => format!("Build template '{}'", self.name),
            UnitRole::BootstrapCache => format!("Create bootstrap cache '{}'", self.name),
            UnitRole::Container | UnitRole::ClusterMember => {
                format!("Create container '{}'", self.name)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanOutline {
    units: Vec<OutlineUnit>,
    cluster_step: Option<u32>,
    storage_step: Option<u32>,
    total_steps: u32,
}

impl PlanOutline {
    pub fn from_config(config: &LabConfig) -> Result<Self> {
        let bootstrap = config
            .bootstrap()
            .ok_or_else(|| PlanError::MissingBootstrap(config.bootstrap_cache.to_string()))?;

        let mut units = Vec::new();
        let mut next = 1;
        let mut push = |name: &TargetName, role, actions: Vec<ActionSpec>| {
            let unit = OutlineUnit {
                name: name.clone(),
                role,
                actions,
                first_step: next,
            };
            next += unit.step_count();
            units.push(unit);
        };

        push(&bootstrap.name, UnitRole::BootstrapCache, bootstrap.actions.clone());
        for template in &config.templates {
            push(&template.name, UnitRole::Template, template.action_specs());
        }
        for container in config.ordinary_containers() {
            push(&container.name, UnitRole::Container, container.actions.clone());
        }
        for container in config.cluster_containers() {
            push(&container.name, UnitRole::ClusterMember, container.actions.clone());
        }

        let mut total_steps = units.last().map(|u| u.last_step()).unwrap_or(0);
        let cluster_step = config.has_cluster().then(|| {
            total_steps += 1;
            total_steps
        });
        let storage_step = (config.storage.is_some() && cluster_step.is_some()).then(|| {
            total_steps += 1;
            total_steps
        });

        Ok(Self {
            units,
            cluster_step,
            storage_step,
            total_steps,
        })
    }

    pub fn units(&self) -> &[OutlineUnit] {
        &self.units
    }

    pub fn cluster_step(&self) -> Option<u32> {
        self.cluster_step
    }

    pub fn storage_step(&self) -> Option<u32> {
        self.storage_step
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    /// Every step with its label, in run order.
    pub fn steps(&self) -> Vec<(u32, String)> {
        let mut steps = Vec::with_capacity(self.total_steps as usize);
        for unit in &self.units {
            steps.push((unit.first_step, unit.creation_label()));
            for (offset, action) in unit.actions.iter().enumerate() {
                let label = format!("{}: {}", unit.name, action.label());
                steps.push((unit.first_step + 1 + offset as u32, label));
            }
        }
        if let Some(step) = self.cluster_step {
            steps.push((step, "Set up swarm cluster".to_string()));
        }
        if let Some(step) = self.storage_step {
            steps.push((step, "Set up shared storage".to_string()));
        }
        steps
    }

    /// Listing shown before a deploy run.
    pub fn render(&self, plan: &DeploymentPlan) -> String {
        let mut out = format!(
            "Deploy plan (total {} steps, running {}-{}):\n",
            self.total_steps,
            plan.start_step(),
            plan.end_step()
        );
        for (step, label) in self.steps() {
            let marker = if plan.would_run(step) { "RUN " } else { "skip" };
            let _ = writeln!(out, "  [{step:02}] {marker} {label}");
        }
        out
    }
}
