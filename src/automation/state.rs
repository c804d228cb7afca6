/*!
 * Automation pipeline state and its reducer.
 *
 * State changes only through `reduce(state, event)`. Events that move the
 * pipeline forward carry the list of steps remaining after the current one,
 * so the next value never depends on previously captured state.
 */

use serde::Serialize;

/// Every pipeline step, in execution order
pub const ALL_STEPS: [u8; 6] = [1, 2, 3, 4, 5, 6];

/// Fallback when precondition skipping leaves nothing to do
pub const FALLBACK_STEPS: [u8; 3] = [4, 5, 6];

/// How a step runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Runs to completion and advances on its own
    Synchronous,
    /// Pauses until an external continue
    Review,
    /// Hands work to the scheduler and waits for it to drain
    Background,
}

/// Kind of a step number
pub fn step_kind(step: u8) -> StepKind {
    match step {
        2 | 3 => StepKind::Review,
        4 | 5 => StepKind::Background,
        _ => StepKind::Synchronous,
    }
}

/// Human-readable step name
pub fn step_label(step: u8) -> &'static str {
    match step {
        1 => "Analyzing story metadata",
        2 => "Reviewing context",
        3 => "Tuning prompt",
        4 => "Translating",
        5 => "Repairing raw lines",
        6 => "Final formatting",
        _ => "Unknown step",
    }
}

/// Whether a recovery cooldown runs before `next`
///
/// Never before a review step: the pause itself gives rate limits time.
pub fn needs_cooldown_before(next: u8) -> bool {
    step_kind(next) != StepKind::Review
}

/// Preconditions that make early steps unnecessary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepPreconditions {
    /// Title and genre metadata already exist (step 1)
    pub has_metadata: bool,
    /// Context notes already confirmed (step 2)
    pub has_context: bool,
    /// Prompt already tuned (step 3)
    pub has_prompt: bool,
}

/// Effective step list for a run
///
/// Unknown step numbers and duplicates are dropped and the result is in
/// ascending order. Steps whose preconditions hold are skipped. An empty
/// result falls back to `[4, 5, 6]`.
pub fn plan_steps(requested: &[u8], preconditions: StepPreconditions) -> Vec<u8> {
    let mut steps: Vec<u8> = requested
        .iter()
        .copied()
        .filter(|step| ALL_STEPS.contains(step))
        .filter(|step| match step {
            1 => !preconditions.has_metadata,
            2 => !preconditions.has_context,
            3 => !preconditions.has_prompt,
            _ => true,
        })
        .collect();
    steps.sort_unstable();
    steps.dedup();

    if steps.is_empty() {
        FALLBACK_STEPS.to_vec()
    } else {
        steps
    }
}

/// Terminal result of the last run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AutomationOutcome {
    Completed,
    Stopped,
    Failed { step: u8, reason: String },
}

/// Orchestrator machine state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutomationState {
    pub running: bool,
    pub current_step: Option<u8>,
    /// Steps not yet run, in order
    pub pending_steps: Vec<u8>,
    pub total_steps: usize,
    pub status_label: String,
    /// Seconds left in the recovery cooldown
    pub countdown: Option<u64>,
    /// Paused at a review step
    pub awaiting_review: bool,
    /// Set when a run ends
    pub outcome: Option<AutomationOutcome>,
}

/// Inputs to the reducer
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    Started { steps: Vec<u8> },
    StepStarted { step: u8, remaining: Vec<u8> },
    AwaitingReview { step: u8, remaining: Vec<u8> },
    ReviewConfirmed,
    StepFinished { step: u8, remaining: Vec<u8> },
    CooldownTick { seconds_left: u64, remaining: Vec<u8> },
    Completed,
    Stopped,
    Failed { step: u8, reason: String },
}

fn finished(label: String, outcome: AutomationOutcome) -> AutomationState {
    AutomationState {
        status_label: label,
        outcome: Some(outcome),
        ..AutomationState::default()
    }
}

/// Pure transition function
///
/// Progress events are ignored unless a run is active.
pub fn reduce(state: &AutomationState, event: &AutomationEvent) -> AutomationState {
    if !state.running && !matches!(event, AutomationEvent::Started { .. }) {
        return state.clone();
    }

    match event {
        AutomationEvent::Started { steps } => AutomationState {
            running: true,
            current_step: None,
            pending_steps: steps.clone(),
            total_steps: steps.len(),
            status_label: format!("Starting {} step(s)", steps.len()),
            countdown: None,
            awaiting_review: false,
            outcome: None,
        },
        AutomationEvent::StepStarted { step, remaining } => AutomationState {
            current_step: Some(*step),
            pending_steps: remaining.clone(),
            status_label: step_label(*step).to_string(),
            countdown: None,
            awaiting_review: false,
            ..state.clone()
        },
        AutomationEvent::AwaitingReview { step, remaining } => AutomationState {
            current_step: Some(*step),
            pending_steps: remaining.clone(),
            status_label: format!("{}: waiting for confirmation", step_label(*step)),
            countdown: None,
            awaiting_review: true,
            ..state.clone()
        },
        AutomationEvent::ReviewConfirmed => AutomationState {
            status_label: format!("{}: confirmed", state.current_step.map_or("Review", step_label)),
            awaiting_review: false,
            ..state.clone()
        },
        AutomationEvent::StepFinished { step, remaining } => AutomationState {
            current_step: Some(*step),
            pending_steps: remaining.clone(),
            status_label: format!("{}: done", step_label(*step)),
            awaiting_review: false,
            ..state.clone()
        },
        AutomationEvent::CooldownTick { seconds_left, remaining } => AutomationState {
            pending_steps: remaining.clone(),
            status_label: format!("Cooling down ({}s)", seconds_left),
            countdown: Some(*seconds_left),
            ..state.clone()
        },
        AutomationEvent::Completed => finished("Automation completed".to_string(), AutomationOutcome::Completed),
        AutomationEvent::Stopped => finished("Automation stopped".to_string(), AutomationOutcome::Stopped),
        AutomationEvent::Failed { step, reason } => finished(
            format!("{} failed: {}", step_label(*step), reason),
            AutomationOutcome::Failed {
                step: *step,
                reason: reason.clone(),
            },
        ),
    }
}
