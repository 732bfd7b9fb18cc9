// ABOUTME: Target lifecycle on the Proxmox host: create, destroy, readiness, sessions, templates.
// ABOUTME: PctProvisioner drives pct and vzdump through the host transport.

use super::target::{TargetRole, TargetSpec};
use crate::classify::{Classifier, CommandResult, ErrorKind};
use crate::config::LabConfig;
use crate::diagnostics::{Diagnostics, Warning};
use crate::package::PackageExecutor;
use crate::shell::{
    Apt, Dpkg, Files, Net, Pct, PctStatus, SystemCtl, Users, Vzdump, and_then,
};
use crate::transport::{
    self, ExecOptions, ExecutionTarget, HostAddress, SshTransport, Transport, TransportError,
};
use crate::types::Vmid;
use async_trait::async_trait;
use parking_lot::Mutex;
use snafu::{ResultExt, Snafu};
use std::path::PathBuf;
use std::time::{Duration, Instant};

const SSH_PORT: u16 = 22;
const NETWORK_ATTEMPTS: u32 = 10;
const ARCHIVE_POLL: Duration = Duration::from_secs(2);
const ARCHIVE_STABLE_POLLS: u32 = 3;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProvisionError {
    #[snafu(display("{operation} failed for ct {vmid}: {message}"))]
    Command {
        vmid: Vmid,
        operation: &'static str,
        kind: ErrorKind,
        message: String,
    },

    #[snafu(display("ct {vmid} still exists after destroy"))]
    DestroyIncomplete { vmid: Vmid },

    #[snafu(display("ct {vmid} does not exist"))]
    Missing { vmid: Vmid },

    #[snafu(display("ct {vmid} not ready after {waited:?}: {reason}"))]
    NotReady {
        vmid: Vmid,
        waited: Duration,
        reason: String,
    },

    #[snafu(display("cannot open session to {address}: {source}"))]
    Connect {
        address: String,
        source: TransportError,
    },

    #[snafu(display("template archive for ct {vmid} did not appear within {waited:?}"))]
    ArchiveMissing { vmid: Vmid, waited: Duration },

    #[snafu(display("cannot read public key {}: {source}", path.display()))]
    PublicKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("no public key path configured and HOME is unset"))]
    NoPublicKey,

    #[snafu(display("password for user {user}: {message}"))]
    Credentials { user: String, message: String },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionErrorKind {
    Command,
    Destroy,
    NotReady,
    Connection,
    Archive,
    Credentials,
}

impl ProvisionError {
    pub fn kind(&self) -> ProvisionErrorKind {
        match self {
            ProvisionError::Command { .. } => ProvisionErrorKind::Command,
            ProvisionError::DestroyIncomplete { .. } => ProvisionErrorKind::Destroy,
            ProvisionError::Missing { .. } | ProvisionError::NotReady { .. } => {
                ProvisionErrorKind::NotReady
            }
            ProvisionError::Connect { .. } => ProvisionErrorKind::Connection,
            ProvisionError::ArchiveMissing { .. } => ProvisionErrorKind::Archive,
            ProvisionError::PublicKey { .. }
            | ProvisionError::NoPublicKey
            | ProvisionError::Credentials { .. } => ProvisionErrorKind::Credentials,
        }
    }

    /// Closest classification in the command taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ProvisionError::Command { kind, .. } => *kind,
            ProvisionError::Connect { source, .. } => source.error_kind(),
            ProvisionError::NotReady { .. } | ProvisionError::ArchiveMissing { .. } => {
                ErrorKind::Timeout
            }
            ProvisionError::Missing { .. } => ErrorKind::NotFound,
            ProvisionError::DestroyIncomplete { .. } => ErrorKind::CommandFailed,
            ProvisionError::PublicKey { .. }
            | ProvisionError::NoPublicKey
            | ProvisionError::Credentials { .. } => ErrorKind::InvalidArgument,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// A transport bound to one provisioned target.
pub struct TargetSession {
    pub target: ExecutionTarget,
    pub transport: Box<dyn Transport>,
    /// Commands need `sudo -n` because the login is not root.
    pub sudo: bool,
}

impl TargetSession {
    pub async fn close(self) -> std::result::Result<(), TransportError> {
        self.transport.close().await
    }
}

/// Lifecycle primitives the pipeline needs from the virtualization layer.
#[async_trait]
pub trait TargetProvisioner: Send + Sync {
    async fn exists(&self, vmid: Vmid) -> Result<bool>;

    /// Create and boot the target, leaving it reachable over SSH.
    async fn create(&self, spec: &TargetSpec) -> Result<()>;

    /// Remove the target; succeeds when it is already gone.
    async fn destroy(&self, vmid: Vmid) -> Result<()>;

    /// Start an existing target if it is stopped.
    async fn ensure_running(&self, spec: &TargetSpec) -> Result<()>;

    async fn wait_until_ready(&self, spec: &TargetSpec, deadline: Duration) -> Result<()>;

    async fn connect(&self, spec: &TargetSpec) -> Result<TargetSession>;

    /// Turn a provisioned template build into an archive and remove the build container.
    async fn finalize_template(&self, spec: &TargetSpec) -> Result<()>;
}

/// Provisioner backed by `pct` on the Proxmox host.
pub struct PctProvisioner<'a> {
    host: &'a dyn Transport,
    address: HostAddress,
    lab: &'a LabConfig,
    classifier: &'a Classifier,
    diagnostics: &'a Mutex<Diagnostics>,
}

impl<'a> PctProvisioner<'a> {
    pub fn new(
        host: &'a dyn Transport,
        lab: &'a LabConfig,
        classifier: &'a Classifier,
        diagnostics: &'a Mutex<Diagnostics>,
    ) -> Self {
        Self {
            host,
            address: lab.host.clone(),
            lab,
            classifier,
            diagnostics,
        }
    }

    fn options(&self) -> ExecOptions {
        ExecOptions::captured(self.lab.ssh.silence_timeout)
    }

    async fn on_host(&self, command: &str) -> CommandResult {
        let target = ExecutionTarget::host(self.address.clone());
        transport::run(self.host, self.classifier, &target, command, self.options()).await
    }

    async fn in_container(&self, vmid: Vmid, command: &str) -> CommandResult {
        let target = ExecutionTarget::container(self.address.clone(), vmid);
        transport::run(self.host, self.classifier, &target, command, self.options()).await
    }

    async fn status(&self, vmid: Vmid) -> PctStatus {
        Pct::parse_status(self.on_host(&Pct::status(vmid)).await.output())
    }

    async fn bring_up_network(&self, vmid: Vmid) -> Result<()> {
        let gateway = self.lab.network.gateway();
        let mut last = String::new();
        for attempt in 1..=NETWORK_ATTEMPTS {
            let result = self.in_container(vmid, &Net::ping(&gateway)).await;
            if result.success {
                return Ok(());
            }
            tracing::debug!(%vmid, attempt, "network not up yet");
            last = result.describe();
            tokio::time::sleep(self.lab.waits.poll_interval).await;
        }
        NotReadySnafu {
            vmid,
            waited: self.lab.waits.poll_interval * NETWORK_ATTEMPTS,
            reason: format!("gateway {gateway} unreachable: {last}"),
        }
        .fail()
    }

    async fn create_users(&self, vmid: Vmid) -> Result<()> {
        for user in self.lab.users.iter() {
            let password = user.password.resolve().map_err(|e| ProvisionError::Credentials {
                user: user.name.clone(),
                message: e.to_string(),
            })?;
            let mut parts = vec![
                Users::ensure(&user.name, "sudo"),
                Users::set_password(&user.name, &password),
            ];
            if user.sudo {
                parts.push(Users::sudoers(&user.name));
            }
            checked(self.in_container(vmid, &and_then(parts)).await, vmid, "user setup")?;
        }
        Ok(())
    }

    async fn install_keys(&self, vmid: Vmid) -> Result<()> {
        let path = self.lab.ssh.public_key_path().ok_or(ProvisionError::NoPublicKey)?;
        let key = tokio::fs::read_to_string(&path)
            .await
            .context(PublicKeySnafu { path: path.clone() })?;
        let key = key.trim();

        let users = self
            .lab
            .users
            .iter()
            .map(|u| u.name.as_str())
            .chain(std::iter::once("root"));
        for user in users {
            checked(
                self.in_container(vmid, &Users::authorized_key(user, key)).await,
                vmid,
                "authorized key install",
            )?;
        }
        Ok(())
    }

    async fn ensure_sshd(&self, vmid: Vmid) -> Result<()> {
        let installed = self.in_container(vmid, &Dpkg::is_installed("openssh-server")).await;
        if !installed.output().lines().any(|l| l.trim() == "installed") {
            let target = ExecutionTarget::container(self.address.clone(), vmid);
            let executor =
                PackageExecutor::new(self.host, self.classifier, &target, &self.lab.packages)
                    .with_diagnostics(self.diagnostics);
            let apt = Apt::new().use_apt_get();
            let install = and_then([apt.update(), apt.install(&["openssh-server".to_string()])]);
            executor
                .execute(&install)
                .await
                .map_err(|e| ProvisionError::Command {
                    vmid,
                    operation: "openssh-server install",
                    kind: e.error_kind(),
                    message: e.to_string(),
                })?;
        }

        let ssh = SystemCtl::service("ssh");
        checked(self.in_container(vmid, &ssh.enable_now()).await, vmid, "sshd start")?;
        let active = self.in_container(vmid, &ssh.is_active()).await;
        if !SystemCtl::parse_is_active(active.output()) {
            return CommandSnafu {
                vmid,
                operation: "sshd start",
                kind: ErrorKind::ServiceError,
                message: "ssh service is not active".to_string(),
            }
            .fail();
        }
        Ok(())
    }

    /// One readiness probe; `Err` carries the reason it is not ready yet.
    async fn probe_ready(&self, spec: &TargetSpec) -> std::result::Result<(), String> {
        match self.status(spec.vmid).await {
            PctStatus::Running => {}
            other => return Err(format!("status is {other:?}")),
        }

        let echo = self.in_container(spec.vmid, "echo ready").await;
        if !echo.output().contains("ready") {
            return Err(format!("pct exec probe: {}", echo.describe()));
        }

        let port = self.on_host(&Net::probe_tcp(&spec.ip, SSH_PORT)).await;
        if !Net::parse_probe(port.output()) {
            return Err(format!("port {SSH_PORT} closed"));
        }

        let session = self.connect(spec).await.map_err(|e| e.to_string())?;
        let probe = session
            .transport
            .execute(&session.target, "echo ready", self.options())
            .await;
        let _ = session.close().await;
        match probe {
            Ok(out) if out.output.contains("ready") => Ok(()),
            Ok(out) => Err(format!("ssh probe printed {:?}", out.output.trim())),
            Err(e) => Err(format!("ssh probe: {e}")),
        }
    }

    async fn wait_for_archive(&self, vmid: Vmid) -> Result<String> {
        let timeout = self.lab.waits.archive_timeout;
        let started = Instant::now();
        let mut last_size = 0;
        let mut stable = 0;
        let mut archive = String::new();

        while started.elapsed() < timeout {
            tokio::time::sleep(ARCHIVE_POLL).await;
            let found = self
                .on_host(&Vzdump::find_archive(vmid, &self.lab.proxmox.dump_dir))
                .await;
            let path = found.output().trim();
            if path.is_empty() {
                continue;
            }
            archive = path.to_string();

            let size = self.on_host(&Vzdump::archive_size(&archive)).await;
            match Vzdump::parse_size(size.output()) {
                Some(n) if n > 0 && n == last_size => {
                    stable += 1;
                    if stable >= ARCHIVE_STABLE_POLLS {
                        return Ok(archive);
                    }
                }
                Some(n) if n > 0 => {
                    stable = 0;
                    last_size = n;
                }
                _ => {}
            }
        }

        if last_size > 0 {
            tracing::warn!(%vmid, "archive {} still growing after {:?}, using it", archive, timeout);
            return Ok(archive);
        }
        ArchiveMissingSnafu {
            vmid,
            waited: timeout,
        }
        .fail()
    }
}

#[async_trait]
impl TargetProvisioner for PctProvisioner<'_> {
    async fn exists(&self, vmid: Vmid) -> Result<bool> {
        let result = self.on_host(&Pct::exists(vmid)).await;
        if result.output.is_none() {
            return CommandSnafu {
                vmid,
                operation: "existence check",
                kind: result.error_kind,
                message: result.describe(),
            }
            .fail();
        }
        Ok(Pct::parse_exists(result.output()))
    }

    async fn create(&self, spec: &TargetSpec) -> Result<()> {
        let vmid = spec.vmid;
        if self.exists(vmid).await? {
            tracing::warn!(%vmid, "removing leftover container before create");
            self.destroy(vmid).await?;
        }

        tracing::info!(%vmid, name = %spec.name, "creating container");
        checked(
            self.on_host(&Pct::create(&spec.create_options(self.lab))).await,
            vmid,
            "pct create",
        )?;

        if spec.features.any() {
            let f = spec.features;
            let result = self
                .on_host(&Pct::set_features(vmid, f.nesting, f.keyctl, f.fuse))
                .await;
            if !result.success {
                self.diagnostics.lock().warn(Warning::container_features(format!(
                    "could not set features on ct {vmid}: {}",
                    result.describe()
                )));
            }
        }

        checked(self.on_host(&Pct::start(vmid)).await, vmid, "pct start")?;
        self.bring_up_network(vmid).await?;
        self.create_users(vmid).await?;
        self.install_keys(vmid).await?;
        self.ensure_sshd(vmid).await?;
        Ok(())
    }

    async fn destroy(&self, vmid: Vmid) -> Result<()> {
        if !self.exists(vmid).await? {
            return Ok(());
        }

        tracing::info!(%vmid, "destroying container");
        let _ = self.on_host(&Pct::stop(vmid)).await;
        let _ = self.on_host(&Pct::destroy(vmid, false)).await;
        if !self.exists(vmid).await? {
            return Ok(());
        }

        tracing::warn!(%vmid, "plain destroy left the container behind, forcing");
        let _ = self.on_host(&Pct::destroy(vmid, true)).await;
        if self.exists(vmid).await? {
            return DestroyIncompleteSnafu { vmid }.fail();
        }
        Ok(())
    }

    async fn ensure_running(&self, spec: &TargetSpec) -> Result<()> {
        match self.status(spec.vmid).await {
            PctStatus::Running => Ok(()),
            PctStatus::Stopped => {
                tracing::info!(vmid = %spec.vmid, "starting stopped container");
                checked(self.on_host(&Pct::start(spec.vmid)).await, spec.vmid, "pct start")?;
                Ok(())
            }
            PctStatus::Unknown => MissingSnafu { vmid: spec.vmid }.fail(),
        }
    }

    async fn wait_until_ready(&self, spec: &TargetSpec, deadline: Duration) -> Result<()> {
        let started = Instant::now();
        loop {
            let reason = match self.probe_ready(spec).await {
                Ok(()) => {
                    tracing::info!(vmid = %spec.vmid, elapsed = ?started.elapsed(), "container ready");
                    return Ok(());
                }
                Err(reason) => reason,
            };
            if started.elapsed() >= deadline {
                return NotReadySnafu {
                    vmid: spec.vmid,
                    waited: deadline,
                    reason,
                }
                .fail();
            }
            tracing::debug!(vmid = %spec.vmid, %reason, "waiting for container");
            tokio::time::sleep(self.lab.waits.poll_interval).await;
        }
    }

    async fn connect(&self, spec: &TargetSpec) -> Result<TargetSession> {
        let config = self.lab.container_session(&spec.ip);
        let user = config.user.clone();
        let transport = SshTransport::connect(config)
            .await
            .context(ConnectSnafu {
                address: spec.ip.clone(),
            })?;
        let address = HostAddress::new(user.clone(), spec.ip.clone());
        Ok(TargetSession {
            target: ExecutionTarget::host(address),
            transport: Box::new(transport),
            sudo: user != "root",
        })
    }

    async fn finalize_template(&self, spec: &TargetSpec) -> Result<()> {
        debug_assert_eq!(spec.role, TargetRole::Template);
        let vmid = spec.vmid;

        let _ = self.on_host(&Pct::stop(vmid)).await;
        let dump = transport::run(
            self.host,
            self.classifier,
            &ExecutionTarget::host(self.address.clone()),
            &Vzdump::create(vmid, &self.lab.proxmox.dump_dir),
            ExecOptions::streamed(self.lab.packages.silence_timeout),
        )
        .await;
        checked(dump, vmid, "vzdump")?;

        let archive = self.wait_for_archive(vmid).await?;
        let destination = self.lab.template_archive(&spec.name);
        checked(
            self.on_host(&Files::move_to(&archive, &destination)).await,
            vmid,
            "archive move",
        )?;
        tracing::info!(%vmid, %destination, "template archive stored");

        self.destroy(vmid).await
    }
}

fn checked(result: CommandResult, vmid: Vmid, operation: &'static str) -> Result<String> {
    if result.success {
        Ok(result.output().to_string())
    } else {
        CommandSnafu {
            vmid,
            operation,
            kind: result.error_kind,
            message: result.describe(),
        }
        .fail()
    }
}
