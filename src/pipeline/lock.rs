// ABOUTME: Deploy lock on the hypervisor host preventing concurrent runs against one lab.
// ABOUTME: Uses atomic file creation with lock info stored in ~/.local/state/pvelab/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::DeployError;
use crate::transport::{ExecOptions, ExecutionTarget, RawOutput, Transport};
use crate::types::TargetName;

/// Base directory for pvelab state files (XDG Base Directory compliant).
const STATE_DIR: &str = ".local/state/pvelab";

/// Information about who holds a deploy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    /// Process ID of the lock holder.
    pub pid: u32,
    /// When the lock was acquired.
    pub started_at: DateTime<Utc>,
    /// Lab being deployed.
    pub lab: String,
}

impl LockInfo {
    pub fn new(lab: &TargetName) -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: Utc::now(),
            lab: lab.to_string(),
        }
    }

    /// Whether the holding process still runs, when that can be checked from here.
    pub fn holder_alive(&self) -> Option<bool> {
        let local = gethostname::gethostname().to_string_lossy().into_owned();
        if self.holder != local {
            return None;
        }
        Some(Path::new("/proc").join(self.pid.to_string()).exists())
    }

    /// A lock is stale when its holder on this machine has exited, or when
    /// its holder elsewhere has held it longer than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.holder_alive() {
            Some(alive) => !alive,
            None => {
                let age = (Utc::now() - self.started_at).to_std().unwrap_or_default();
                age >= max_age
            }
        }
    }

    /// Path to the lock file for a lab.
    /// Uses $HOME for shell expansion compatibility.
    pub fn lock_path(lab: &TargetName) -> String {
        format!("$HOME/{}/{}.lock", STATE_DIR, lab)
    }
}

/// A held deploy lock. Release it explicitly with [`DeployLock::release`].
pub struct DeployLock<'a> {
    transport: &'a dyn Transport,
    target: ExecutionTarget,
    lab: TargetName,
}

impl std::fmt::Debug for DeployLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployLock")
            .field("lab", &self.lab)
            .field("target", &self.target)
            .finish()
    }
}

impl<'a> DeployLock<'a> {
    /// Acquire the deploy lock for `lab` on the host behind `target`.
    ///
    /// Uses shell noclobber mode for atomic lock acquisition (no TOCTOU race).
    /// Returns an error if the lock is held by another process.
    /// Auto-breaks stale locks (see [`LockInfo::is_stale`]) with a warning.
    pub async fn acquire(
        transport: &'a dyn Transport,
        target: &ExecutionTarget,
        lab: &TargetName,
        force: bool,
        stale_after: Duration,
    ) -> Result<Self, DeployError> {
        let target = target.host_level();
        let lock_path = LockInfo::lock_path(lab);

        exec(transport, &target, &format!("mkdir -p ~/{}", STATE_DIR))
            .await
            .and_then(|out| ok_or_lock_error(out, "failed to create state directory"))?;

        let lock_json = serde_json::to_string(&LockInfo::new(lab))
            .map_err(|e| DeployError::Lock(format!("failed to serialize lock: {e}")))?;
        let escaped_json = lock_json.replace('\'', "'\\''");

        // set -C makes > fail if the file already exists
        let acquire_cmd = format!(
            "(set -C; echo '{}' > \"{}\") 2>/dev/null",
            escaped_json, lock_path
        );

        if exec(transport, &target, &acquire_cmd).await?.exit_code == Some(0) {
            return Ok(Self {
                transport,
                target,
                lab: lab.clone(),
            });
        }

        let existing = read_lock(transport, &target, &lock_path).await?;
        let should_break = match &existing {
            Some(info) if force => {
                tracing::warn!(
                    "Breaking lock held by {} (pid {}) since {}",
                    info.holder,
                    info.pid,
                    info.started_at
                );
                true
            }
            Some(info) if info.is_stale(stale_after) => {
                tracing::warn!(
                    "Auto-breaking stale lock held by {} (pid {}) since {}",
                    info.holder,
                    info.pid,
                    info.started_at
                );
                true
            }
            Some(_) => false,
            None => {
                tracing::warn!("Lock info unreadable, breaking lock");
                true
            }
        };

        if !should_break {
            if let Some(info) = existing {
                return Err(DeployError::LockHeld {
                    holder: info.holder,
                    pid: info.pid,
                    started_at: info.started_at,
                });
            }
            return Err(DeployError::Lock("lock held by another process".to_string()));
        }

        tracing::debug!("Removing stale/forced lock at {}", lock_path);
        let _ = exec(transport, &target, &format!("rm -f \"{}\"", lock_path)).await;

        if exec(transport, &target, &acquire_cmd).await?.exit_code != Some(0) {
            return Err(DeployError::Lock(
                "lock acquired by another process during break".to_string(),
            ));
        }

        Ok(Self {
            transport,
            target,
            lab: lab.clone(),
        })
    }

    /// Release the lock.
    pub async fn release(self) -> Result<(), DeployError> {
        let lock_path = LockInfo::lock_path(&self.lab);
        let out = exec(self.transport, &self.target, &format!("rm -f \"{}\"", lock_path)).await?;
        ok_or_lock_error(out, "failed to remove lock file").map(|_| ())
    }
}

/// `None` when the lock file is missing or not valid lock JSON.
async fn read_lock(
    transport: &dyn Transport,
    target: &ExecutionTarget,
    lock_path: &str,
) -> Result<Option<LockInfo>, DeployError> {
    let out = exec(transport, target, &format!("cat \"{}\"", lock_path)).await?;
    if out.exit_code != Some(0) {
        return Ok(None);
    }
    Ok(serde_json::from_str::<LockInfo>(out.output.trim()).ok())
}

async fn exec(
    transport: &dyn Transport,
    target: &ExecutionTarget,
    command: &str,
) -> Result<RawOutput, DeployError> {
    transport
        .execute(target, command, ExecOptions::default())
        .await
        .map_err(|e| DeployError::Lock(e.to_string()))
}

fn ok_or_lock_error(out: RawOutput, context: &str) -> Result<RawOutput, DeployError> {
    if out.exit_code == Some(0) {
        Ok(out)
    } else {
        Err(DeployError::Lock(format!("{context}: {}", out.output.trim())))
    }
}
