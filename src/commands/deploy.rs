// ABOUTME: Deploy command implementation.
// ABOUTME: Holds the deploy lock on the host while the pipeline runs the selected step window.

use super::{connect_host, disconnect_host};
use parking_lot::Mutex;
use pvelab::config::LabConfig;
use pvelab::diagnostics::{Diagnostics, Warning};
use pvelab::error::Result;
use pvelab::output::Output;
use pvelab::pipeline::{DeployLock, PctProvisioner, Pipeline};
use pvelab::plan::{DeploymentPlan, PlanOutline, PlanState};
use pvelab::transport::ExecutionTarget;

/// Steps requested on the command line. Both ends are inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepWindow {
    pub start: Option<u32>,
    pub end: Option<u32>,
}

/// Deploy the lab, or the requested slice of it.
pub async fn deploy(lab: LabConfig, window: StepWindow, force: bool, mut output: Output) -> Result<()> {
    lab.validate()?;
    let outline = PlanOutline::from_config(&lab)?;
    let mut plan = DeploymentPlan::new(outline.total_steps(), window.start, window.end)?;

    output.start_timer();
    let classifier = lab.classifier();
    let diagnostics = Mutex::new(Diagnostics::default());

    let host = connect_host(&lab, &output).await?;
    let host_target = ExecutionTarget::host(lab.host.clone());

    output.progress("Acquiring deploy lock...");
    let lock = match DeployLock::acquire(
        &host,
        &host_target,
        &lab.name,
        force,
        lab.waits.lock_stale_after,
    )
    .await
    {
        Ok(lock) => lock,
        Err(e) => {
            disconnect_host(&host, &lab, &mut diagnostics.lock()).await;
            return Err(e.into());
        }
    };

    let provisioner = PctProvisioner::new(&host, &lab, &classifier, &diagnostics);
    let pipeline = Pipeline::new(
        &lab,
        &outline,
        &host,
        &provisioner,
        &classifier,
        &diagnostics,
        &output,
    );
    let result = pipeline.run(&mut plan).await;

    let mut diag = diagnostics.into_inner();
    if let Err(e) = lock.release().await {
        diag.warn(Warning::lock_release(format!(
            "failed to release deploy lock for {}: {}",
            lab.name, e
        )));
    }
    disconnect_host(&host, &lab, &mut diag).await;

    for warning in diag.warnings() {
        output.warning(warning);
    }

    match result? {
        PlanState::PartiallyCompleted => {
            output.success(&format!(
                "Partial deploy of '{}' complete: ran steps {}-{} of {}",
                lab.name,
                plan.start_step(),
                plan.end_step(),
                plan.total_steps()
            ));
        }
        _ => output.success(&format!("Lab '{}' deployed", lab.name)),
    }
    Ok(())
}
