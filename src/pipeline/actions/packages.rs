// ABOUTME: Package-manager actions: install, upgrade, remove, and apt proxy setup.
// ABOUTME: All apt traffic goes through the contention-aware executor.

use super::{Action, ActionContext, ActionError};
use crate::shell::{Apt, Files};
use async_trait::async_trait;

const APT_PROXY_FILE: &str = "/etc/apt/apt.conf.d/01proxy";

fn apt() -> Apt {
    Apt::new().use_apt_get()
}

pub struct InstallPackages {
    packages: Vec<String>,
}

impl InstallPackages {
    pub fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }
}

#[async_trait]
impl Action for InstallPackages {
    fn name(&self) -> &str {
        "install-packages"
    }

    fn description(&self) -> String {
        format!("Install packages: {}", self.packages.join(", "))
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        if self.packages.is_empty() {
            return Err(ActionError::Invalid("install-packages needs at least one package".into()));
        }
        let executor = ctx.packages();
        executor.execute(&apt().update()).await?;
        executor.execute(&apt().install(&self.packages)).await?;
        Ok(())
    }
}

pub struct UpgradePackages;

#[async_trait]
impl Action for UpgradePackages {
    fn name(&self) -> &str {
        "upgrade-packages"
    }

    fn description(&self) -> String {
        "Upgrade packages".to_string()
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        let executor = ctx.packages();
        executor.execute(&apt().update()).await?;
        executor.execute(&apt().upgrade()).await?;
        Ok(())
    }
}

pub struct RemovePackages {
    packages: Vec<String>,
}

impl RemovePackages {
    pub fn new(packages: Vec<String>) -> Self {
        Self { packages }
    }
}

#[async_trait]
impl Action for RemovePackages {
    fn name(&self) -> &str {
        "remove-packages"
    }

    fn description(&self) -> String {
        format!("Remove packages: {}", self.packages.join(", "))
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        if self.packages.is_empty() {
            return Err(ActionError::Invalid("remove-packages needs at least one package".into()));
        }
        ctx.packages().execute(&apt().remove(&self.packages)).await?;
        Ok(())
    }
}

/// Point apt at the bootstrap cache. A no-op on the cache itself.
pub struct ConfigureAptProxy;

#[async_trait]
impl Action for ConfigureAptProxy {
    fn name(&self) -> &str {
        "configure-apt-proxy"
    }

    fn description(&self) -> String {
        "Configure apt proxy".to_string()
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<(), ActionError> {
        if ctx.spec().name == ctx.lab().bootstrap_cache {
            tracing::debug!(target = %ctx.target(), "bootstrap cache needs no proxy");
            return Ok(());
        }
        let Some(url) = ctx.apt_proxy_url() else {
            return Err(ActionError::Invalid("no bootstrap cache to proxy through".into()));
        };
        let content = format!("Acquire::http::Proxy \"{url}\";\n");
        ctx.run_checked(&Files::write(APT_PROXY_FILE, &content)).await?;
        Ok(())
    }
}
