/*!
 * Automation pipeline.
 *
 * - `state`: machine state, events, the pure reducer and step planning
 * - `orchestrator`: the driver task that runs the six steps
 */

pub mod orchestrator;
pub mod state;

pub use orchestrator::AutomationOrchestrator;
pub use state::{AutomationEvent, AutomationOutcome, AutomationState, StepPreconditions, plan_steps, reduce};
