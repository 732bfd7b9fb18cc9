// ABOUTME: SSH session management using russh.
// ABOUTME: Connects, runs commands with a silence-based timeout, and disconnects.

use super::auth::{Credentials, HostKeyVerifier};
use super::error::{Error, Result};
use russh::client::{self, Config, Handle};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const KEEPALIVE_MAX: usize = 4;

/// Configuration for establishing an SSH session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    /// Optional path to private key file.
    /// If None, will try SSH agent then default key locations.
    pub key_path: Option<PathBuf>,
    /// Whether to accept unknown hosts (Trust On First Use).
    pub trust_on_first_use: bool,
    /// Optional path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
    /// Skip host key checks for hosts rebuilt on every run (lab containers).
    pub ephemeral_host: bool,
    /// Limit on TCP connect plus handshake (default: 10 seconds).
    pub connect_timeout: Duration,
    /// Longest tolerated gap between two pieces of output (default: 5 minutes).
    pub silence_timeout: Duration,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key_path: None,
            trust_on_first_use: false,
            known_hosts_path: None,
            ephemeral_host: false,
            connect_timeout: Duration::from_secs(10),
            silence_timeout: Duration::from_secs(300),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn trust_on_first_use(mut self, tofu: bool) -> Self {
        self.trust_on_first_use = tofu;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn ephemeral_host(mut self, ephemeral: bool) -> Self {
        self.ephemeral_host = ephemeral;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn silence_timeout(mut self, timeout: Duration) -> Self {
        self.silence_timeout = timeout;
        self
    }
}

/// An established SSH session.
pub struct Session {
    config: SessionConfig,
    handle: Handle<HostKeyVerifier>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Session {
    /// Connect to the remote host and authenticate.
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let credentials = Credentials::resolve(config.key_path.as_deref()).await?;

        let russh_config = client_config();

        let verifier = HostKeyVerifier::new(
            config.host.clone(),
            config.port,
            config.trust_on_first_use,
            config.known_hosts_path.clone(),
        )
        .ephemeral(config.ephemeral_host);

        let connecting = client::connect(
            Arc::new(russh_config),
            (config.host.as_str(), config.port),
            verifier,
        );
        let mut handle = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: config.host.clone(),
                port: config.port,
                timeout: config.connect_timeout,
            })?
            .map_err(|e| {
                if e.to_string().contains("Connection refused") {
                    Error::Connection(format!(
                        "connection refused to {}:{}",
                        config.host, config.port
                    ))
                } else {
                    Error::Connection(e.to_string())
                }
            })?;

        if !credentials.authenticate(&mut handle, &config.user).await? {
            return Err(Error::AuthenticationFailed);
        }

        tracing::debug!("connected to {}@{}:{}", config.user, config.host, config.port);
        Ok(Self { config, handle })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Execute a command, handing every chunk of output to `on_output` as it arrives.
    ///
    /// There is no limit on total runtime. The command fails with
    /// [`Error::SilenceTimeout`] only when no output arrives for `silence_timeout`;
    /// the remote process is then sent SIGKILL and the channel is closed.
    pub async fn exec_streaming(
        &self,
        command: &str,
        silence_timeout: Duration,
        on_output: &mut (dyn FnMut(&[u8]) + Send),
    ) -> Result<u32> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;

        channel.exec(true, command).await?;
        drain(&mut channel, silence_timeout, on_output)
            .await
            .inspect_err(|e| {
                if matches!(e, Error::SilenceTimeout(_)) {
                    tracing::warn!(
                        "no output from {} for {:?}, killed remote command",
                        self.config.host,
                        silence_timeout
                    );
                }
            })
    }

    /// Disconnect the session.
    pub async fn disconnect(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// Connection settings shared by every session.
///
/// Idle connections are kept open with keepalives; silence limits are per
/// command and enforced by [`Session::exec_streaming`].
fn client_config() -> Config {
    Config {
        inactivity_timeout: None,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        ..Default::default()
    }
}

/// Messages of one exec channel.
trait MessageSource {
    fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send;

    /// Stop the remote command and close the channel.
    fn kill(&mut self) -> impl Future<Output = ()> + Send;
}

impl MessageSource for Channel<client::Msg> {
    fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send {
        self.wait()
    }

    async fn kill(&mut self) {
        if let Err(e) = self.signal(Sig::KILL).await {
            tracing::debug!("kill signal not delivered: {}", e);
        }
        let _ = self.close().await;
    }
}

/// Read until the command exits, failing when `source` stays silent for `silence_timeout`.
async fn drain<S: MessageSource>(
    source: &mut S,
    silence_timeout: Duration,
    on_output: &mut (dyn FnMut(&[u8]) + Send),
) -> Result<u32> {
    let mut exit_code = None;
    let mut exit_signal = None;
    let mut got_eof = false;

    loop {
        let Ok(msg) = tokio::time::timeout(silence_timeout, source.next_message()).await else {
            source.kill().await;
            return Err(Error::SilenceTimeout(silence_timeout));
        };

        match msg {
            Some(ChannelMsg::Data { data }) => on_output(&data[..]),
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => on_output(&data[..]),
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
                if got_eof {
                    break;
                }
            }
            Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                exit_signal = Some(format!("{:?}", signal_name));
            }
            Some(ChannelMsg::Eof) => {
                got_eof = true;
                if exit_code.is_some() {
                    break;
                }
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    match (exit_code, exit_signal) {
        (Some(code), _) => Ok(code),
        (None, Some(signal)) => Err(Error::Signalled(signal)),
        (None, None) => Err(Error::ChannelClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::new("pve.lab", "root");
        assert_eq!(config.port, 22);
        assert!(!config.trust_on_first_use);
        assert_eq!(config.silence_timeout, Duration::from_secs(300));
        assert!(config.key_path.is_none());
        assert!(!config.ephemeral_host);
    }

    #[test]
    fn session_config_builder_overrides() {
        let config = SessionConfig::new("10.0.0.5", "ops")
            .port(2222)
            .key_path("/keys/lab")
            .trust_on_first_use(true)
            .connect_timeout(Duration::from_secs(3))
            .silence_timeout(Duration::from_secs(600));
        assert_eq!(config.port, 2222);
        assert_eq!(config.key_path, Some(PathBuf::from("/keys/lab")));
        assert!(config.trust_on_first_use);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.silence_timeout, Duration::from_secs(600));
    }

    #[test]
    fn idle_connections_stay_open() {
        let config = client_config();
        assert_eq!(config.inactivity_timeout, None);
        assert_eq!(config.keepalive_interval, Some(KEEPALIVE_INTERVAL));
        assert!(config.keepalive_max > 0);
    }

    mod streaming {
        use super::*;
        use russh::CryptoVec;
        use tokio::sync::mpsc;

        /// Channel stand-in fed from a test task.
        struct Scripted {
            rx: mpsc::Receiver<ChannelMsg>,
            killed: bool,
        }

        impl MessageSource for Scripted {
            fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send {
                self.rx.recv()
            }

            async fn kill(&mut self) {
                self.killed = true;
            }
        }

        fn data(text: &str) -> ChannelMsg {
            ChannelMsg::Data {
                data: CryptoVec::from_slice(text.as_bytes()),
            }
        }

        fn exit(code: u32) -> [ChannelMsg; 2] {
            [ChannelMsg::ExitStatus { exit_status: code }, ChannelMsg::Eof]
        }

        async fn collect(
            source: &mut Scripted,
            silence_timeout: Duration,
        ) -> (Result<u32>, String) {
            let mut buffer = Vec::new();
            let result = drain(source, silence_timeout, &mut |chunk: &[u8]| {
                buffer.extend_from_slice(chunk)
            })
            .await;
            (result, String::from_utf8_lossy(&buffer).into_owned())
        }

        /// Test: a long quiet stretch under the silence limit is not an error
        #[tokio::test]
        async fn quiet_command_within_limit_completes() {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                tx.send(data("Setting up foo ...\n")).await.ok();
                for msg in exit(0) {
                    tx.send(msg).await.ok();
                }
            });
            let mut source = Scripted { rx, killed: false };

            let (result, output) = collect(&mut source, Duration::from_secs(5)).await;

            assert_eq!(result.unwrap(), 0);
            assert_eq!(output, "Setting up foo ...\n");
            assert!(!source.killed);
        }

        /// Test: total runtime may exceed the limit as long as output keeps arriving
        #[tokio::test]
        async fn steady_output_resets_the_silence_clock() {
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(async move {
                for i in 0..8 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    tx.send(data(&format!("Unpacking {i}\n"))).await.ok();
                }
                for msg in exit(0) {
                    tx.send(msg).await.ok();
                }
            });
            let mut source = Scripted { rx, killed: false };
            let started = std::time::Instant::now();

            let (result, output) = collect(&mut source, Duration::from_millis(200)).await;

            assert_eq!(result.unwrap(), 0);
            assert!(started.elapsed() > Duration::from_millis(200));
            assert_eq!(output.lines().count(), 8);
        }

        /// Test: exceeding the silence limit kills the command and reports a timeout
        #[tokio::test]
        async fn silence_past_limit_kills_command() {
            let (tx, rx) = mpsc::channel(8);
            let mut source = Scripted { rx, killed: false };

            let (result, _) = collect(&mut source, Duration::from_millis(100)).await;

            assert!(matches!(result, Err(Error::SilenceTimeout(d)) if d == Duration::from_millis(100)));
            assert!(source.killed);
            drop(tx);
        }

        /// Test: stderr is interleaved and a non-zero exit is returned, not raised
        #[tokio::test]
        async fn exit_code_and_stderr_are_reported() {
            let (tx, rx) = mpsc::channel(8);
            tx.send(data("Reading package lists...\n")).await.unwrap();
            tx.send(ChannelMsg::ExtendedData {
                data: CryptoVec::from_slice(b"E: Unable to locate package nope\n"),
                ext: 1,
            })
            .await
            .unwrap();
            for msg in exit(100) {
                tx.send(msg).await.unwrap();
            }
            let mut source = Scripted { rx, killed: false };

            let (result, output) = collect(&mut source, Duration::from_secs(1)).await;

            assert_eq!(result.unwrap(), 100);
            assert!(output.ends_with("E: Unable to locate package nope\n"));
        }

        /// Test: a channel that closes without an exit status is an error
        #[tokio::test]
        async fn close_without_status_is_an_error() {
            let (tx, rx) = mpsc::channel(8);
            tx.send(ChannelMsg::Close).await.unwrap();
            let mut source = Scripted { rx, killed: false };

            let (result, _) = collect(&mut source, Duration::from_secs(1)).await;

            assert!(matches!(result, Err(Error::ChannelClosed)));
        }
    }
}
