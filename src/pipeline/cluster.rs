// ABOUTME: Cluster-wide steps run after every container exists: swarm formation and shared storage.
// ABOUTME: Commands go through the host transport into each member with nested targets.

use crate::classify::{Classifier, CommandResult, ErrorKind};
use crate::config::{ContainerConfig, LabConfig};
use crate::diagnostics::Diagnostics;
use crate::package::{PackageError, PackageExecutor};
use crate::pipeline::ClusterRole;
use crate::shell::{Apt, Gluster, Swarm, SwarmRole, SystemCtl, and_then};
use crate::transport::{self, ExecOptions, ExecutionTarget, Transport};
use parking_lot::Mutex;
use thiserror::Error;

const FAILURE_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{operation} on '{member}' failed: {kind}: {message}")]
    Command {
        member: String,
        operation: &'static str,
        kind: ErrorKind,
        message: String,
        tail: String,
    },

    #[error("no swarm manager container is configured")]
    NoManager,

    #[error("could not read {role} join token from '{member}'")]
    Token { member: String, role: &'static str },

    #[error("package install on '{member}' failed: {source}")]
    Package {
        member: String,
        source: PackageError,
    },
}

impl ClusterError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ClusterError::Command { kind, .. } => *kind,
            ClusterError::NoManager => ErrorKind::InvalidArgument,
            ClusterError::Token { .. } => ErrorKind::CommandFailed,
            ClusterError::Package { source, .. } => source.error_kind(),
        }
    }

    pub fn output_tail(&self) -> Option<&str> {
        match self {
            ClusterError::Command { tail, .. } if !tail.is_empty() => Some(tail),
            ClusterError::Package { source, .. } => source.output_tail(),
            _ => None,
        }
    }
}

/// Runs commands inside cluster members through the hypervisor.
pub struct ClusterOps<'a> {
    host: &'a dyn Transport,
    lab: &'a LabConfig,
    classifier: &'a Classifier,
    diagnostics: &'a Mutex<Diagnostics>,
}

impl<'a> ClusterOps<'a> {
    pub fn new(
        host: &'a dyn Transport,
        lab: &'a LabConfig,
        classifier: &'a Classifier,
        diagnostics: &'a Mutex<Diagnostics>,
    ) -> Self {
        Self {
            host,
            lab,
            classifier,
            diagnostics,
        }
    }

    fn target(&self, member: &ContainerConfig) -> ExecutionTarget {
        ExecutionTarget::container(self.lab.host.clone(), member.id)
    }

    fn ip(&self, member: &ContainerConfig) -> String {
        self.lab.network.ip(member.ip_octet)
    }

    async fn run(&self, member: &ContainerConfig, command: &str) -> CommandResult {
        transport::run(
            self.host,
            self.classifier,
            &self.target(member),
            command,
            ExecOptions::captured(self.lab.ssh.silence_timeout),
        )
        .await
    }

    async fn run_checked(
        &self,
        member: &ContainerConfig,
        operation: &'static str,
        command: &str,
    ) -> Result<String, ClusterError> {
        let result = self.run(member, command).await;
        if result.success {
            Ok(result.output().to_string())
        } else {
            Err(ClusterError::Command {
                member: member.name.to_string(),
                operation,
                kind: result.error_kind,
                message: result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| result.error_kind.to_string()),
                tail: result.output_tail(FAILURE_TAIL_LINES),
            })
        }
    }

    async fn swarm_active(&self, member: &ContainerConfig) -> bool {
        Swarm::parse_active(self.run(member, &Swarm::state()).await.output())
    }

    async fn token(&self, leader: &ContainerConfig, role: SwarmRole) -> Result<String, ClusterError> {
        let output = self
            .run_checked(leader, "join-token", &Swarm::join_token(role))
            .await?;
        Swarm::parse_token(&output).ok_or_else(|| ClusterError::Token {
            member: leader.name.to_string(),
            role: match role {
                SwarmRole::Manager => "manager",
                SwarmRole::Worker => "worker",
            },
        })
    }

    /// Initialize the swarm on the first manager and join every other member.
    ///
    /// Members already in a swarm are left alone, so the step can be repeated.
    pub async fn setup_swarm(&self) -> Result<(), ClusterError> {
        let members: Vec<&ContainerConfig> = self.lab.cluster_containers().collect();
        let (managers, workers): (Vec<_>, Vec<_>) = members
            .into_iter()
            .partition(|c| c.cluster_role() == Some(ClusterRole::Manager));
        let Some((leader, other_managers)) = managers.split_first() else {
            return Err(ClusterError::NoManager);
        };
        let leader_ip = self.ip(leader);

        if self.swarm_active(leader).await {
            tracing::info!(leader = %leader.name, "swarm already initialized");
        } else {
            tracing::info!(leader = %leader.name, "initializing swarm");
            self.run_checked(leader, "swarm init", &Swarm::init(&leader_ip))
                .await?;
        }

        if !other_managers.is_empty() {
            let token = self.token(leader, SwarmRole::Manager).await?;
            for manager in other_managers {
                self.join(manager, &token, &leader_ip).await?;
            }
        }
        if !workers.is_empty() {
            let token = self.token(leader, SwarmRole::Worker).await?;
            for worker in &workers {
                self.join(worker, &token, &leader_ip).await?;
            }
        }

        let nodes = self.run_checked(leader, "node list", &Swarm::node_ls()).await?;
        tracing::info!(
            nodes = nodes.lines().skip(1).count(),
            "swarm formed"
        );
        Ok(())
    }

    async fn join(
        &self,
        member: &ContainerConfig,
        token: &str,
        leader_ip: &str,
    ) -> Result<(), ClusterError> {
        if self.swarm_active(member).await {
            tracing::info!(member = %member.name, "already in swarm");
            return Ok(());
        }
        tracing::info!(member = %member.name, "joining swarm");
        self.run_checked(member, "swarm join", &Swarm::join(token, leader_ip))
            .await?;
        Ok(())
    }

    /// Build a replicated GlusterFS volume across the storage members and mount it on each.
    pub async fn setup_storage(&self) -> Result<(), ClusterError> {
        let Some(storage) = &self.lab.storage else {
            return Ok(());
        };
        let members = self.lab.storage_members();
        let Some((first, rest)) = members.split_first() else {
            return Ok(());
        };

        let apt = Apt::new().use_apt_get();
        let install = and_then([
            apt.update(),
            apt.install(&["glusterfs-server".to_string()]),
        ]);
        for member in &members {
            let target = self.target(member);
            PackageExecutor::new(self.host, self.classifier, &target, &self.lab.packages)
                .with_diagnostics(self.diagnostics)
                .execute(&install)
                .await
                .map_err(|source| ClusterError::Package {
                    member: member.name.to_string(),
                    source,
                })?;
            self.run_checked(
                member,
                "glusterd start",
                &SystemCtl::service("glusterd").enable_now(),
            )
            .await?;
            self.run_checked(
                member,
                "brick directory",
                &format!("mkdir -p {}", crate::shell::quote(&storage.brick_dir)),
            )
            .await?;
        }

        for member in rest {
            self.run_checked(first, "peer probe", &Gluster::peer_probe(&self.ip(member)))
                .await?;
        }

        let exists = self.run(first, &Gluster::volume_exists(&storage.volume)).await;
        if Gluster::parse_volume_exists(exists.output()) {
            tracing::info!(volume = %storage.volume, "volume already exists");
        } else {
            let bricks: Vec<String> = members
                .iter()
                .map(|m| format!("{}:{}", self.ip(m), storage.brick_dir))
                .collect();
            self.run_checked(
                first,
                "volume create",
                &Gluster::volume_create(&storage.volume, members.len(), &bricks),
            )
            .await?;
            self.run_checked(first, "volume start", &Gluster::volume_start(&storage.volume))
                .await?;
        }

        let server = self.ip(first);
        for member in &members {
            self.run_checked(
                member,
                "volume mount",
                &Gluster::mount(&server, &storage.volume, &storage.mount_point),
            )
            .await?;
        }
        tracing::info!(volume = %storage.volume, members = members.len(), "shared storage ready");
        Ok(())
    }
}
