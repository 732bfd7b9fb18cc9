// ABOUTME: Host key verification and client authentication for russh sessions.
// ABOUTME: Resolves explicit keys, the SSH agent, or default key files in that order.

use super::error::{Error, Result};
use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixStream;

/// Default private keys tried when neither a key path nor an agent is available.
const DEFAULT_KEYS: [&str; 3] = [".ssh/id_ed25519", ".ssh/id_rsa", ".ssh/id_ecdsa"];

/// russh handler that checks server keys against known_hosts.
pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
    ephemeral: bool,
}

impl HostKeyVerifier {
    pub(crate) fn new(
        host: String,
        port: u16,
        trust_on_first_use: bool,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host,
            port,
            trust_on_first_use,
            known_hosts_path,
            ephemeral: false,
        }
    }

    /// Accept any key without recording it. For hosts whose key changes on every rebuild.
    pub(crate) fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    fn remember(&self, key: &ssh_key::PublicKey) {
        let learned = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        };
        if let Err(e) = learned {
            tracing::warn!("could not record host key for {}: {}", self.host, e);
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.ephemeral {
            tracing::debug!("accepting host key of ephemeral host {}", self.host);
            return Ok(true);
        }

        let known = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match known {
            Ok(true) => Ok(true),
            // A changed key is never accepted, even with TOFU enabled.
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!("host key for {}:{} has changed", self.host, self.port);
                Ok(false)
            }
            Ok(false) if self.trust_on_first_use => {
                tracing::warn!(
                    "trusting unknown host key for {}:{} on first use",
                    self.host,
                    self.port
                );
                self.remember(server_public_key);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(_) => Ok(self.trust_on_first_use),
        }
    }
}

/// Credentials chosen for a connection.
pub(crate) enum Credentials {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

impl Credentials {
    pub(crate) async fn resolve(key_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = key_path {
            return load_key(path).map(Credentials::KeyFile);
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(Credentials::Agent(agent));
        }

        let home = std::env::var("HOME").map_err(|_| {
            Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
        })?;

        DEFAULT_KEYS
            .iter()
            .find_map(|rel| load_key(&Path::new(&home).join(rel)).ok())
            .map(Credentials::KeyFile)
            .ok_or_else(|| {
                Error::AgentUnavailable("SSH agent not available and no default keys found".into())
            })
    }

    pub(crate) async fn authenticate(
        self,
        handle: &mut Handle<HostKeyVerifier>,
        user: &str,
    ) -> Result<bool> {
        match self {
            Credentials::Agent(mut agent) => {
                let identities = agent.request_identities().await.map_err(|e| {
                    Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
                })?;
                if identities.is_empty() {
                    return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
                }

                for identity in identities {
                    if let Ok(result) = handle
                        .authenticate_publickey_with(user, identity, None, &mut agent)
                        .await
                        && result.success()
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Credentials::KeyFile(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                let result = handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                    .await?;
                Ok(result.success())
            }
        }
    }
}

fn load_key(path: &Path) -> Result<Arc<ssh_key::PrivateKey>> {
    load_secret_key(path, None)
        .map(Arc::new)
        .map_err(|e| Error::KeyLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}
