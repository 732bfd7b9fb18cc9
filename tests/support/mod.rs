// ABOUTME: Test support utilities.
// ABOUTME: Provides a scripted fake transport, a recording provisioner, and a collecting reporter.

use async_trait::async_trait;
use parking_lot::Mutex;
use pvelab::config::LabConfig;
use pvelab::pipeline::{
    ProgressReporter, ProvisionError, TargetProvisioner, TargetSession, TargetSpec,
};
use pvelab::transport::{
    ExecOptions, ExecutionTarget, HostAddress, RawOutput, Transport, TransportError,
};
use pvelab::types::Vmid;
use std::collections::VecDeque;
use std::sync::{Arc, Once};
use std::time::Duration;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("pvelab=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A lab with an apt cache (steps 1-5) and a database container (steps 6-10).
#[allow(dead_code)]
pub const TEN_STEP_LAB: &str = r#"
name: testlab
host: root@pve.test
network: { prefix: "10.0.0" }
users:
  - { name: root, password: secret }
containers:
  - id: 100
    name: apt-cache
    type: apt-cache
    ip_octet: 10
    ports: []
    actions:
      - { type: run-script, name: cache-1, script: "echo cache-1" }
      - { type: run-script, name: cache-2, script: "echo cache-2" }
      - { type: run-script, name: cache-3, script: "echo cache-3" }
      - { type: run-script, name: cache-4, script: "echo cache-4" }
  - id: 110
    name: pgsql
    type: pgsql
    ip_octet: 11
    ports: []
    actions:
      - { type: run-script, name: db-1, script: "echo db-1" }
      - { type: run-script, name: db-2, script: "echo db-2" }
      - { type: run-script, name: db-3, script: "echo db-3" }
      - { type: run-script, name: db-4, script: "echo db-4" }
"#;

#[allow(dead_code)]
pub fn lab(yaml: &str) -> LabConfig {
    let lab = LabConfig::from_yaml(yaml).expect("test lab parses");
    lab.validate().expect("test lab is valid");
    lab
}

#[allow(dead_code)]
pub fn host_address() -> HostAddress {
    HostAddress::new("root", "pve.test")
}

#[derive(Debug, Clone)]
enum Reply {
    Output(String, i32),
    Timeout,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
struct FakeState {
    rules: Vec<Rule>,
    calls: Vec<(String, String)>,
    closed: bool,
}

/// Transport that answers commands from a script and records every call.
///
/// The first rule whose pattern occurs in the command answers it. A rule with
/// several replies hands them out in order and then repeats the last one.
/// Unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

#[allow(dead_code)]
impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock probes report clear and cleanup reports done.
    pub fn package_ready() -> Self {
        let fake = Self::new();
        fake.respond("locks_held", "locks_clear\n", 0);
        fake.respond("apt_cleanup_done", "apt_cleanup_done\n", 0);
        fake
    }

    pub fn respond(&self, pattern: &str, output: &str, exit_code: i32) -> &Self {
        self.respond_seq(pattern, &[(output, exit_code)])
    }

    pub fn respond_seq(&self, pattern: &str, replies: &[(&str, i32)]) -> &Self {
        let replies = replies
            .iter()
            .map(|(out, code)| Reply::Output(out.to_string(), *code))
            .collect();
        self.push_rule(pattern, replies);
        self
    }

    pub fn time_out(&self, pattern: &str) -> &Self {
        self.push_rule(pattern, VecDeque::from([Reply::Timeout]));
        self
    }

    fn push_rule(&self, pattern: &str, replies: VecDeque<Reply>) {
        // Later rules win so tests can override the defaults from package_ready().
        self.state.lock().rules.insert(
            0,
            Rule {
                pattern: pattern.to_string(),
                replies,
            },
        );
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, cmd)| cmd).collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(
        &self,
        target: &ExecutionTarget,
        command: &str,
        _options: ExecOptions,
    ) -> Result<RawOutput, TransportError> {
        let mut state = self.state.lock();
        state.calls.push((target.to_string(), command.to_string()));
        let reply = state
            .rules
            .iter_mut()
            .find(|rule| command.contains(&rule.pattern))
            .and_then(|rule| {
                if rule.replies.len() > 1 {
                    rule.replies.pop_front()
                } else {
                    rule.replies.front().cloned()
                }
            });
        match reply {
            Some(Reply::Output(output, code)) => Ok(RawOutput {
                output,
                exit_code: Some(code),
            }),
            Some(Reply::Timeout) => Err(TransportError::Timeout(Duration::from_secs(1))),
            None => Ok(RawOutput {
                output: String::new(),
                exit_code: Some(0),
            }),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Provisioner that records lifecycle calls and hands out sessions over one fake transport.
pub struct FakeProvisioner {
    pub session_transport: FakeTransport,
    events: Mutex<Vec<String>>,
    fail_create: Option<Vmid>,
    fail_connect: Option<String>,
}

#[allow(dead_code)]
impl FakeProvisioner {
    pub fn new(session_transport: FakeTransport) -> Self {
        Self {
            session_transport,
            events: Mutex::new(Vec::new()),
            fail_create: None,
            fail_connect: None,
        }
    }

    pub fn failing_create(mut self, vmid: Vmid) -> Self {
        self.fail_create = Some(vmid);
        self
    }

    /// Sessions to the named target are refused.
    pub fn failing_connect(mut self, name: &str) -> Self {
        self.fail_connect = Some(name.to_string());
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.events.lock().iter().any(|e| e == event)
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl TargetProvisioner for FakeProvisioner {
    async fn exists(&self, vmid: Vmid) -> Result<bool, ProvisionError> {
        self.record(format!("exists {vmid}"));
        Ok(true)
    }

    async fn create(&self, spec: &TargetSpec) -> Result<(), ProvisionError> {
        self.record(format!("create {}", spec.name));
        if self.fail_create == Some(spec.vmid) {
            return Err(ProvisionError::Missing { vmid: spec.vmid });
        }
        Ok(())
    }

    async fn destroy(&self, vmid: Vmid) -> Result<(), ProvisionError> {
        self.record(format!("destroy {vmid}"));
        Ok(())
    }

    async fn ensure_running(&self, spec: &TargetSpec) -> Result<(), ProvisionError> {
        self.record(format!("ensure_running {}", spec.name));
        Ok(())
    }

    async fn wait_until_ready(
        &self,
        spec: &TargetSpec,
        _deadline: Duration,
    ) -> Result<(), ProvisionError> {
        self.record(format!("ready {}", spec.name));
        Ok(())
    }

    async fn connect(&self, spec: &TargetSpec) -> Result<TargetSession, ProvisionError> {
        self.record(format!("connect {}", spec.name));
        if self.fail_connect.as_deref() == Some(spec.name.as_str()) {
            return Err(ProvisionError::Connect {
                address: spec.ip.clone(),
                source: TransportError::Connection("refused".to_string()),
            });
        }
        Ok(TargetSession {
            target: ExecutionTarget::host(HostAddress::new("root", spec.ip.clone())),
            transport: Box::new(self.session_transport.clone()),
            sudo: false,
        })
    }

    async fn finalize_template(&self, spec: &TargetSpec) -> Result<(), ProvisionError> {
        self.record(format!("finalize {}", spec.name));
        Ok(())
    }
}

/// Reporter that keeps every line for assertions.
#[derive(Default)]
pub struct CollectingReporter {
    lines: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl CollectingReporter {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn step_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.starts_with("[Overall:"))
            .collect()
    }

    pub fn skipped(&self) -> Vec<u32> {
        self.lines()
            .iter()
            .filter_map(|l| l.strip_prefix("skip "))
            .filter_map(|rest| rest.split(':').next())
            .filter_map(|n| n.parse().ok())
            .collect()
    }
}

impl ProgressReporter for CollectingReporter {
    fn plan(&self, listing: &str) {
        self.lines.lock().push(listing.to_string());
    }

    fn step(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn skipped(&self, step: u32, label: &str) {
        self.lines.lock().push(format!("skip {step}: {label}"));
    }

    fn note(&self, message: &str) {
        self.lines.lock().push(message.to_string());
    }
}
