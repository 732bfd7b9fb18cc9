// ABOUTME: Command module aggregator for the pvelab CLI.
// ABOUTME: Re-exports deploy, cleanup, and status command handlers.

mod cleanup;
mod deploy;
mod status;

pub use cleanup::cleanup;
pub use deploy::{StepWindow, deploy};
pub use status::status;

use pvelab::config::LabConfig;
use pvelab::diagnostics::{Diagnostics, Warning};
use pvelab::error::Result;
use pvelab::output::{Output, OutputMode};
use pvelab::transport::{SshTransport, Transport};

/// Open the host transport for `lab`.
async fn connect_host(lab: &LabConfig, output: &Output) -> Result<SshTransport> {
    output.progress(&format!("Connecting to {}...", lab.host));
    let transport = SshTransport::connect(lab.host_session()).await?;
    Ok(transport.console_echo(output.mode() == OutputMode::Normal))
}

/// Close the host transport; a failure is only a warning.
async fn disconnect_host(transport: &SshTransport, lab: &LabConfig, diag: &mut Diagnostics) {
    if let Err(e) = transport.close().await {
        diag.warn(Warning::ssh_disconnect(format!(
            "SSH disconnect failed for {}: {}",
            lab.host, e
        )));
    }
}
