// ABOUTME: Property tests for the deployment plan's step window.
// ABOUTME: Monotonic counter, nothing below start runs, the first step past end halts.

use proptest::prelude::*;
use pvelab::plan::{DeploymentPlan, PlanState, StepDecision};

/// Total steps plus a valid (start, end) window inside them.
fn window() -> impl Strategy<Value = (u32, u32, u32)> {
    (1u32..60).prop_flat_map(|total| {
        (1..=total).prop_flat_map(move |start| (Just(total), Just(start), start..=total))
    })
}

proptest! {
    /// Test: advancing never decreases the counter and respects the window
    #[test]
    fn advances_are_monotonic_and_windowed(
        (total, start, end) in window(),
        extra in 0u32..10,
    ) {
        let mut plan = DeploymentPlan::new(total, Some(start), Some(end)).unwrap();
        let mut previous = plan.current_step();
        let mut ran = Vec::new();
        let mut halted_at = None;

        for _ in 0..(total + extra) {
            let decision = plan.advance();
            prop_assert!(plan.current_step() >= previous);
            previous = plan.current_step();
            match decision {
                StepDecision::Skip(step) => prop_assert!(step < start),
                StepDecision::Run(step) => {
                    prop_assert!(step >= start && step <= end);
                    ran.push(step);
                }
                StepDecision::Halt => {
                    halted_at.get_or_insert(plan.current_step());
                }
            }
        }

        let expected: Vec<u32> = (start..=end).collect();
        prop_assert_eq!(ran, expected);
        prop_assert!(plan.current_step() <= end, "no step past end is reached");
        if end < total || extra > 0 {
            prop_assert_eq!(halted_at, Some(end));
        }

        let state = plan.finish();
        if end < total {
            prop_assert_eq!(state, PlanState::PartiallyCompleted);
        } else {
            prop_assert!(state.is_success());
        }
    }

    /// Test: overall progress stays within 0..=100
    #[test]
    fn overall_percent_is_bounded((total, start, end) in window()) {
        let mut plan = DeploymentPlan::new(total, Some(start), Some(end)).unwrap();
        while plan.advance() != StepDecision::Halt {
            prop_assert!(plan.overall_percent() <= 100);
        }
    }
}

/// Test: a window outside the plan is rejected
#[test]
fn invalid_windows_are_rejected() {
    assert!(DeploymentPlan::new(10, Some(0), None).is_err());
    assert!(DeploymentPlan::new(10, Some(11), None).is_err());
    assert!(DeploymentPlan::new(10, Some(5), Some(4)).is_err());
    assert!(DeploymentPlan::new(10, None, Some(11)).is_err());
    assert!(DeploymentPlan::new(0, None, None).is_err());
}

/// Test: an aborted plan stays aborted and stops advancing
#[test]
fn aborted_plan_is_terminal() {
    let mut plan = DeploymentPlan::new(5, None, None).unwrap();
    assert_eq!(plan.state(), PlanState::NotStarted);
    assert_eq!(plan.advance(), StepDecision::Run(1));
    assert_eq!(plan.state(), PlanState::Running);
    assert_eq!(plan.abort(), PlanState::Aborted);
    assert_eq!(plan.advance(), StepDecision::Halt);
    assert_eq!(plan.finish(), PlanState::Aborted);
}
