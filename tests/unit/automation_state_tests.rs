/*!
 * Tests for the automation reducer and step planning
 */

use chapterflow::automation::state::{StepKind, step_kind};
use chapterflow::automation::{AutomationEvent, AutomationOutcome, AutomationState, StepPreconditions, plan_steps, reduce};

fn run(events: &[AutomationEvent]) -> AutomationState {
    events
        .iter()
        .fold(AutomationState::default(), |state, event| reduce(&state, event))
}

#[test]
fn test_planSteps_withMetadataOnly_shouldSkipAnalysis() {
    let pre = StepPreconditions {
        has_metadata: true,
        has_context: false,
        has_prompt: false,
    };

    assert_eq!(plan_steps(&[1, 2, 3, 4, 5, 6], pre), vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_stepKinds_shouldMatchPipeline() {
    assert_eq!(step_kind(1), StepKind::Synchronous);
    assert_eq!(step_kind(2), StepKind::Review);
    assert_eq!(step_kind(3), StepKind::Review);
    assert_eq!(step_kind(4), StepKind::Background);
    assert_eq!(step_kind(5), StepKind::Background);
    assert_eq!(step_kind(6), StepKind::Synchronous);
}

#[test]
fn test_reduce_fullRun_shouldEndCompletedAndIdle() {
    let state = run(&[
        AutomationEvent::Started { steps: vec![4, 6] },
        AutomationEvent::StepStarted {
            step: 4,
            remaining: vec![6],
        },
        AutomationEvent::StepFinished {
            step: 4,
            remaining: vec![6],
        },
        AutomationEvent::CooldownTick {
            seconds_left: 1,
            remaining: vec![6],
        },
        AutomationEvent::StepStarted {
            step: 6,
            remaining: vec![],
        },
        AutomationEvent::StepFinished {
            step: 6,
            remaining: vec![],
        },
        AutomationEvent::Completed,
    ]);

    assert!(!state.running);
    assert_eq!(state.current_step, None);
    assert!(state.pending_steps.is_empty());
    assert_eq!(state.countdown, None);
    assert_eq!(state.outcome, Some(AutomationOutcome::Completed));
}

#[test]
fn test_reduce_stepStarted_shouldClearCountdown() {
    let state = run(&[
        AutomationEvent::Started { steps: vec![4, 5] },
        AutomationEvent::CooldownTick {
            seconds_left: 3,
            remaining: vec![5],
        },
        AutomationEvent::StepStarted {
            step: 5,
            remaining: vec![],
        },
    ]);

    assert_eq!(state.countdown, None);
    assert_eq!(state.current_step, Some(5));
}

#[test]
fn test_state_shouldSerializeForDisplay() {
    let state = run(&[
        AutomationEvent::Started { steps: vec![1, 4] },
        AutomationEvent::Failed {
            step: 1,
            reason: "analysis failed".to_string(),
        },
    ]);

    let json = serde_json::to_value(&state).unwrap();

    assert_eq!(json["running"], false);
    assert_eq!(json["outcome"]["Failed"]["step"], 1);
}
