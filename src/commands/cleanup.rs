// ABOUTME: Cleanup command implementation.
// ABOUTME: Destroys the lab's containers and template builds on the host and deletes their archives.

use super::{connect_host, disconnect_host};
use parking_lot::Mutex;
use pvelab::config::LabConfig;
use pvelab::diagnostics::Diagnostics;
use pvelab::error::Result;
use pvelab::output::Output;
use pvelab::pipeline::{PctProvisioner, Teardown};

/// Remove everything the lab created on the host.
///
/// Only ids declared in the configuration are touched; other guests on the host are left alone.
/// The base OS archive is kept so the next deploy can start from it.
pub async fn cleanup(lab: LabConfig, mut output: Output) -> Result<()> {
    output.start_timer();
    let classifier = lab.classifier();
    let diagnostics = Mutex::new(Diagnostics::default());
    let host = connect_host(&lab, &output).await?;

    output.progress("Destroying lab containers...");
    let outcome = {
        let provisioner = PctProvisioner::new(&host, &lab, &classifier, &diagnostics);
        Teardown::new(&lab, &host, &provisioner, &classifier, &diagnostics)
            .run()
            .await
    };

    let mut diag = diagnostics.into_inner();
    disconnect_host(&host, &lab, &mut diag).await;
    let report = outcome?;
    for warning in diag.warnings() {
        output.warning(warning);
    }

    output.success(&format!(
        "Cleaned up '{}': {} container(s) destroyed, {} template archive(s) removed",
        lab.name,
        report.destroyed.len(),
        report.archives_removed.len()
    ));
    Ok(())
}
