// ABOUTME: Global step counter for a resumable deploy run.
// ABOUTME: Decides run/skip/halt per step and renders progress lines.

mod outline;

pub use outline::{OutlineUnit, PlanOutline, UnitRole};

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("start step {start} is out of range 1..={total}")]
    StartOutOfRange { start: u32, total: u32 },

    #[error("end step {end} is out of range {start}..={total}")]
    EndOutOfRange { start: u32, end: u32, total: u32 },

    #[error("bootstrap cache container '{0}' is not defined")]
    MissingBootstrap(String),
}

pub type Result<T> = std::result::Result<T, PlanError>;

/// Lifecycle of one deploy run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    NotStarted,
    Running,
    Completed,
    /// Stopped at `end_step` before the last step. A successful outcome.
    PartiallyCompleted,
    Aborted,
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanState::Completed | PlanState::PartiallyCompleted | PlanState::Aborted
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, PlanState::Completed | PlanState::PartiallyCompleted)
    }
}

impl fmt::Display for PlanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanState::NotStarted => "not started",
            PlanState::Running => "running",
            PlanState::Completed => "completed",
            PlanState::PartiallyCompleted => "partially completed",
            PlanState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// What to do with the step just reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDecision {
    Run(u32),
    /// Below `start_step`: already done by an earlier run.
    Skip(u32),
    /// Past `end_step`: stop the whole run successfully.
    Halt,
}

/// Step bookkeeping shared by every phase of a run.
///
/// Steps are numbered from 1. `current_step` only grows; once a step past
/// `end_step` is reached the plan stays halted.
#[derive(Debug)]
pub struct DeploymentPlan {
    total_steps: u32,
    current_step: u32,
    start_step: u32,
    end_step: u32,
    state: PlanState,
    halted: bool,
}

impl DeploymentPlan {
    pub fn new(total_steps: u32, start_step: Option<u32>, end_step: Option<u32>) -> Result<Self> {
        if total_steps == 0 {
            return Err(PlanError::Empty);
        }
        let start = start_step.unwrap_or(1);
        if start < 1 || start > total_steps {
            return Err(PlanError::StartOutOfRange {
                start,
                total: total_steps,
            });
        }
        let end = end_step.unwrap_or(total_steps);
        if end < start || end > total_steps {
            return Err(PlanError::EndOutOfRange {
                start,
                end,
                total: total_steps,
            });
        }

        Ok(Self {
            total_steps,
            current_step: 0,
            start_step: start,
            end_step: end,
            state: PlanState::NotStarted,
            halted: false,
        })
    }

    /// Move to the next step and decide whether it runs.
    pub fn advance(&mut self) -> StepDecision {
        if self.halted || self.state.is_terminal() {
            return StepDecision::Halt;
        }
        if self.state == PlanState::NotStarted {
            self.state = PlanState::Running;
        }

        let next = self.current_step.saturating_add(1);
        if next > self.end_step {
            self.halted = true;
            tracing::info!(step = next, end = self.end_step, "end step reached, halting");
            return StepDecision::Halt;
        }

        self.current_step = next;
        if next < self.start_step {
            StepDecision::Skip(next)
        } else {
            StepDecision::Run(next)
        }
    }

    /// Whether step `step` falls inside the requested window.
    pub fn would_run(&self, step: u32) -> bool {
        (self.start_step..=self.end_step).contains(&step)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True when the run stops short of the last step.
    pub fn is_partial(&self) -> bool {
        self.end_step < self.total_steps
    }

    /// Close a run that did not fail.
    pub fn finish(&mut self) -> PlanState {
        if !self.state.is_terminal() {
            self.state = if self.halted || self.is_partial() {
                PlanState::PartiallyCompleted
            } else {
                PlanState::Completed
            };
        }
        self.state
    }

    pub fn abort(&mut self) -> PlanState {
        if !self.state.is_terminal() {
            self.state = PlanState::Aborted;
        }
        self.state
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn current_step(&self) -> u32 {
        self.current_step
    }

    pub fn start_step(&self) -> u32 {
        self.start_step
    }

    pub fn end_step(&self) -> u32 {
        self.end_step
    }

    pub fn overall_percent(&self) -> u32 {
        percent(self.current_step, self.total_steps)
    }

    /// `[Overall: P%] [Target 'name': Q%] [Step: N] description`
    pub fn progress_line(&self, target: &TargetProgress, description: &str) -> String {
        format!(
            "[Overall: {}%] [Target '{}': {}%] [Step: {}] {}",
            self.overall_percent(),
            target.name,
            target.percent(),
            self.current_step,
            description
        )
    }
}

/// Per-target share of the steps, for the second progress bracket.
#[derive(Debug, Clone)]
pub struct TargetProgress {
    name: String,
    total: u32,
    done: u32,
}

impl TargetProgress {
    pub fn new(name: impl Into<String>, total: u32) -> Self {
        Self {
            name: name.into(),
            total,
            done: 0,
        }
    }

    /// Count one more of this target's steps as reached.
    pub fn step(&mut self) {
        self.done = (self.done + 1).min(self.total);
    }

    pub fn percent(&self) -> u32 {
        percent(self.done, self.total)
    }
}

fn percent(part: u32, whole: u32) -> u32 {
    if whole == 0 {
        return 100;
    }
    (u64::from(part) * 100 / u64::from(whole)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_step() {
        let plan = DeploymentPlan::new(10, None, None).unwrap();
        assert_eq!(plan.start_step(), 1);
        assert_eq!(plan.end_step(), 10);
        assert_eq!(plan.state(), PlanState::NotStarted);
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        assert_eq!(DeploymentPlan::new(0, None, None).unwrap_err(), PlanError::Empty);
        assert!(matches!(
            DeploymentPlan::new(10, Some(0), None),
            Err(PlanError::StartOutOfRange { .. })
        ));
        assert!(matches!(
            DeploymentPlan::new(10, Some(11), None),
            Err(PlanError::StartOutOfRange { .. })
        ));
        assert!(matches!(
            DeploymentPlan::new(10, Some(5), Some(4)),
            Err(PlanError::EndOutOfRange { .. })
        ));
        assert!(matches!(
            DeploymentPlan::new(10, None, Some(11)),
            Err(PlanError::EndOutOfRange { .. })
        ));
    }

    #[test]
    fn skips_before_start_and_halts_after_end() {
        let mut plan = DeploymentPlan::new(5, Some(2), Some(3)).unwrap();
        assert_eq!(plan.advance(), StepDecision::Skip(1));
        assert_eq!(plan.state(), PlanState::Running);
        assert_eq!(plan.advance(), StepDecision::Run(2));
        assert_eq!(plan.advance(), StepDecision::Run(3));
        assert_eq!(plan.advance(), StepDecision::Halt);
        assert_eq!(plan.current_step(), 3);
        assert_eq!(plan.advance(), StepDecision::Halt);
        assert_eq!(plan.finish(), PlanState::PartiallyCompleted);
    }

    #[test]
    fn full_run_completes() {
        let mut plan = DeploymentPlan::new(2, None, None).unwrap();
        plan.advance();
        plan.advance();
        assert_eq!(plan.finish(), PlanState::Completed);
        assert!(plan.state().is_success());
    }

    #[test]
    fn abort_is_final() {
        let mut plan = DeploymentPlan::new(3, None, None).unwrap();
        plan.advance();
        assert_eq!(plan.abort(), PlanState::Aborted);
        assert_eq!(plan.finish(), PlanState::Aborted);
        assert_eq!(plan.advance(), StepDecision::Halt);
        assert!(!plan.state().is_success());
    }

    #[test]
    fn progress_line_format() {
        let mut plan = DeploymentPlan::new(10, None, None).unwrap();
        for _ in 0..6 {
            plan.advance();
        }
        let mut target = TargetProgress::new("pgsql", 4);
        target.step();
        target.step();
        assert_eq!(
            plan.progress_line(&target, "Install packages: postgresql"),
            "[Overall: 60%] [Target 'pgsql': 50%] [Step: 6] Install packages: postgresql"
        );
    }

    #[test]
    fn target_progress_saturates() {
        let mut target = TargetProgress::new("x", 1);
        target.step();
        target.step();
        assert_eq!(target.percent(), 100);
    }
}
