/*!
 * Six-step automation pipeline.
 *
 * One driver task runs the planned steps in order. It owns the list of
 * pending steps and hands the remaining list to every event it emits, so
 * resuming after an asynchronous step never re-reads shared state.
 *
 * Steps 2 and 3 pause until `continue_review`. Steps 4 and 5 hand work to
 * the scheduler and wait for its session report. A recovery cooldown runs
 * before every step except a review step.
 */

use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::app_config::{AutomationConfig, Tier};
use crate::errors::{AutomationError, SchedulerError};
use crate::providers::StoryAnalyzer;
use crate::translation::scheduler::{SessionOutcome, SessionReport, TranslationScheduler};

use super::state::{
    AutomationEvent, AutomationState, StepPreconditions, needs_cooldown_before, plan_steps, reduce,
};

/// Characters of source text handed to the story analyzer
const ANALYSIS_SAMPLE_CHARS: usize = 3000;

/// Run bookkeeping, guarded together with event dispatch
struct RunControl {
    run_id: u64,
    handle: Option<JoinHandle<()>>,
    /// Resumes the open review step; taken by the first continue
    review: Option<oneshot::Sender<()>>,
}

struct OrchestratorInner {
    scheduler: TranslationScheduler,
    analyzer: Arc<dyn StoryAnalyzer>,
    cooldown: Duration,
    control: Mutex<RunControl>,
    state_tx: watch::Sender<AutomationState>,
}

/// Automation pipeline driver
#[derive(Clone)]
pub struct AutomationOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl AutomationOrchestrator {
    /// Create an orchestrator over a scheduler
    pub fn new(scheduler: TranslationScheduler, analyzer: Arc<dyn StoryAnalyzer>, config: &AutomationConfig) -> Self {
        let (state_tx, _) = watch::channel(AutomationState::default());
        Self {
            inner: Arc::new(OrchestratorInner {
                scheduler,
                analyzer,
                cooldown: Duration::from_secs(config.cooldown_secs),
                control: Mutex::new(RunControl {
                    run_id: 0,
                    handle: None,
                    review: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> AutomationState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutomationState> {
        self.inner.state_tx.subscribe()
    }

    /// Preconditions derived from the scheduler's prompt material
    pub fn preconditions(&self) -> StepPreconditions {
        let prompt = self.inner.scheduler.prompt_context();
        StepPreconditions {
            has_metadata: prompt.story.has_metadata(),
            has_context: !prompt.context_notes.trim().is_empty(),
            has_prompt: !prompt.prompt.trim().is_empty(),
        }
    }

    /// Start a run over `requested` steps; returns the effective plan
    pub fn start(&self, requested: &[u8], tier: Tier) -> Result<Vec<u8>, AutomationError> {
        let steps = plan_steps(requested, self.preconditions());

        let mut control = self.inner.control.lock();
        if self.inner.state_tx.borrow().running {
            return Err(AutomationError::AlreadyRunning);
        }
        control.run_id += 1;
        control.review = None;
        let run_id = control.run_id;
        self.inner.apply(&AutomationEvent::Started { steps: steps.clone() });
        info!("Automation started with steps {:?}", steps);

        let inner = Arc::clone(&self.inner);
        let plan = steps.clone();
        control.handle = Some(tokio::spawn(async move {
            inner.drive(run_id, plan, tier).await;
        }));
        Ok(steps)
    }

    /// Resume a run paused at a review step
    ///
    /// Each pause accepts exactly one continue.
    pub fn continue_review(&self) -> Result<(), AutomationError> {
        let mut control = self.inner.control.lock();
        let state = self.inner.state_tx.borrow().clone();
        if !state.running {
            return Err(AutomationError::NotRunning);
        }
        let Some(review) = control.review.take() else {
            return Err(AutomationError::NotAwaitingReview(state.current_step));
        };
        self.inner.apply(&AutomationEvent::ReviewConfirmed);
        // The driver is gone only if the run was stopped
        let _ = review.send(());
        Ok(())
    }

    /// Stop the run and any scheduler work it started; idempotent
    pub fn stop(&self) -> bool {
        let mut control = self.inner.control.lock();
        let state = self.inner.state_tx.borrow().clone();
        if !state.running {
            return false;
        }

        control.run_id += 1;
        control.review = None;
        if let Some(handle) = control.handle.take() {
            handle.abort();
        }
        if matches!(state.current_step, Some(4) | Some(5)) {
            self.inner.scheduler.stop();
        }
        self.inner.apply(&AutomationEvent::Stopped);
        info!("Automation stopped");
        true
    }

    /// Resolve when the current run has ended
    pub async fn wait_until_finished(&self) -> AutomationState {
        let mut state = self.subscribe();
        match state.wait_for(|s| !s.running).await {
            Ok(finished) => finished.clone(),
            Err(_) => self.state(),
        }
    }
}

impl OrchestratorInner {
    fn apply(&self, event: &AutomationEvent) {
        self.state_tx.send_modify(|state| *state = reduce(state, event));
    }

    /// Apply an event only while `run_id` is the current run
    fn dispatch(&self, run_id: u64, event: AutomationEvent) -> bool {
        let control = self.control.lock();
        if control.run_id != run_id {
            return false;
        }
        self.apply(&event);
        true
    }

    async fn drive(self: Arc<Self>, run_id: u64, steps: Vec<u8>, tier: Tier) {
        let mut pending = steps;

        while !pending.is_empty() {
            let step = pending.remove(0);
            let remaining = pending.clone();
            if !self.dispatch(
                run_id,
                AutomationEvent::StepStarted {
                    step,
                    remaining: remaining.clone(),
                },
            ) {
                return;
            }

            let result = match step {
                1 => self.analyze().await,
                2 => self.review(run_id, step, &remaining).await,
                3 if !self.has_custom_material() => {
                    info!("No custom metadata or rules, skipping prompt tuning");
                    Ok(())
                }
                3 => self.review(run_id, step, &remaining).await,
                4 => self.translate(tier).await,
                5 => self.repair().await,
                6 => {
                    self.scheduler.format_all();
                    Ok(())
                }
                other => {
                    warn!("Ignoring unknown automation step {}", other);
                    Ok(())
                }
            };

            if let Err(reason) = result {
                error!("Automation step {} failed: {}", step, reason);
                self.dispatch(run_id, AutomationEvent::Failed { step, reason });
                return;
            }

            self.dispatch(
                run_id,
                AutomationEvent::StepFinished {
                    step,
                    remaining: remaining.clone(),
                },
            );

            if let Some(&next) = remaining.first() {
                if needs_cooldown_before(next) && !self.cool_down(run_id, &remaining).await {
                    return;
                }
            }
            pending = remaining;
        }

        if self.dispatch(run_id, AutomationEvent::Completed) {
            info!("Automation completed");
        }
    }

    /// Step 3 runs only when there is something to tune
    fn has_custom_material(&self) -> bool {
        let prompt = self.scheduler.prompt_context();
        !prompt.story.genres.is_empty() || !prompt.prompt.trim().is_empty()
    }

    async fn analyze(&self) -> Result<(), String> {
        let mut prompt = self.scheduler.prompt_context();
        let sample: String = self
            .scheduler
            .items()
            .iter()
            .flat_map(|item| item.source_text.chars())
            .take(ANALYSIS_SAMPLE_CHARS)
            .collect();

        let mut meta = self
            .analyzer
            .analyze(&sample, &prompt.story)
            .await
            .map_err(|e| e.to_string())?;
        if meta.source_languages.is_empty() {
            meta.source_languages = prompt.story.source_languages.clone();
        }
        prompt.story = meta;
        self.scheduler.set_prompt_context(prompt);
        Ok(())
    }

    async fn review(&self, run_id: u64, step: u8, remaining: &[u8]) -> Result<(), String> {
        let (resume_tx, resume_rx) = oneshot::channel();
        {
            let mut control = self.control.lock();
            if control.run_id != run_id {
                return Err("Run was replaced".to_string());
            }
            control.review = Some(resume_tx);
            self.apply(&AutomationEvent::AwaitingReview {
                step,
                remaining: remaining.to_vec(),
            });
        }
        resume_rx.await.map_err(|_| "Review was cancelled".to_string())
    }

    async fn translate(&self, tier: Tier) -> Result<(), String> {
        let reports = self.scheduler.subscribe_reports();
        match self.scheduler.start(tier, None) {
            Ok(0) => {
                info!("Nothing to translate");
                Ok(())
            }
            Ok(_) => Self::await_report(reports).await,
            Err(error) => Err(error.to_string()),
        }
    }

    async fn repair(&self) -> Result<(), String> {
        let reports = self.scheduler.subscribe_reports();
        match self.scheduler.start_repair() {
            Ok(_) => Self::await_report(reports).await,
            Err(SchedulerError::NothingToRepair(reason)) => {
                info!("Skipping repair: {}", reason);
                Ok(())
            }
            Err(error) => Err(error.to_string()),
        }
    }

    /// Wait for the scheduler's terminal report
    async fn await_report(mut reports: broadcast::Receiver<SessionReport>) -> Result<(), String> {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    return match report.outcome {
                        SessionOutcome::Halted(reason) => Err(reason),
                        SessionOutcome::Cancelled => Err("Scheduler session was stopped".to_string()),
                        SessionOutcome::Clean | SessionOutcome::WithIssues => Ok(()),
                    };
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} scheduler report(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err("Scheduler report channel closed".to_string());
                }
            }
        }
    }

    /// Count down the recovery cooldown; false when the run was replaced
    async fn cool_down(&self, run_id: u64, remaining: &[u8]) -> bool {
        let seconds = self.cooldown.as_secs();
        for seconds_left in (1..=seconds).rev() {
            if !self.dispatch(
                run_id,
                AutomationEvent::CooldownTick {
                    seconds_left,
                    remaining: remaining.to_vec(),
                },
            ) {
                return false;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        true
    }
}
