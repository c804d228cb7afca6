/*!
 * Batch scheduler for a translation session.
 *
 * The scheduler owns item status while items are `Processing` or
 * `Repairing`. All session state sits behind one mutex and is re-evaluated
 * by `pump` after every mutation: session start, batch completion, repair
 * completion, requeue, and quota release. There is no polling; when no model
 * has headroom a single timer is armed for the next release.
 *
 * Every spawned batch carries the session generation it was started in.
 * A stop bumps the generation, so late completions from an abandoned
 * session are ignored.
 */

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

use crate::app_config::{Config, SchedulerConfig, Tier};
use crate::errors::{ProviderError, SchedulerError, is_quota_exhaustion};
use crate::language_utils::ContentClass;
use crate::providers::{
    AggregatedFixes, AggregatedRepairRequest, BatchItem, BatchRequest, BatchResponse, BatchSink,
    PromptContext, Repairer, SingleRepairRequest, Translator, WRONG_LANGUAGE_ERROR,
};
use crate::quota::QuotaLedger;
use crate::validation::{EnglishStopwordGuard, IntegrityValidator, LanguageGuard};

use super::batch::{Batch, BatchAssembler};
use super::concurrency::{ProfileMode, ProfileTable, content_class_for};
use super::context::RollingContext;
use super::formatting::TextFormatter;
use super::item::{ItemStatus, WorkItem};
use super::repair::{
    RepairOutcome, SingleRepairPlan, apply_line_fixes, collect_repair_entries, fixes_to_map,
    plan_single_repair,
};

/// Capacity of the session report channel
const REPORT_CHANNEL_CAPACITY: usize = 16;

/// Shortest wake-up delay when waiting for quota
const MIN_WAKE_DELAY: Duration = Duration::from_millis(50);

/// Runtime policy of the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Retry errors and heavy-raw items when the queue drains
    pub smart_auto: bool,
    /// Start an aggregated repair when the queue drains
    pub auto_fix: bool,
    pub max_error_retries: u32,
    pub max_heavy_raw_retries: u32,
    pub heavy_raw_threshold: usize,
    /// Delay before a second or later concurrent submission
    pub stagger_delay: Duration,
    pub rolling_context_chars: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            smart_auto: config.smart_auto,
            auto_fix: config.auto_fix,
            max_error_retries: config.max_error_retries,
            max_heavy_raw_retries: config.max_heavy_raw_retries,
            heavy_raw_threshold: config.heavy_raw_threshold,
            stagger_delay: Duration::from_millis(config.stagger_delay_ms),
            rolling_context_chars: config.rolling_context_chars,
        }
    }
}

/// Observable scheduler state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStatus {
    /// A session is running
    pub active: bool,
    /// Items waiting for a batch
    pub queued: usize,
    /// Batches awaiting a result
    pub in_flight: usize,
    /// An aggregated repair is running
    pub repairing: bool,
    pub fix_phase: bool,
    pub tier: Tier,
}

impl SchedulerStatus {
    /// Nothing queued, nothing in flight
    pub fn is_drained(&self) -> bool {
        !self.active && self.queued == 0 && self.in_flight == 0
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Every item completed without residual raw content
    Clean,
    /// Finished, but some items are in error or still carry raw content
    WithIssues,
    /// Emergency stop: quota exhausted or no usable model
    Halted(String),
    /// Stopped by the caller
    Cancelled,
}

/// Terminal summary of a session, emitted exactly once per session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub completed: usize,
    pub errors: usize,
    /// Completed items that still carry raw characters
    pub raw_items: usize,
    pub idle: usize,
}

impl SessionReport {
    pub fn is_clean(&self) -> bool {
        self.outcome == SessionOutcome::Clean
    }
}

impl std::fmt::Display for SessionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match &self.outcome {
            SessionOutcome::Clean => "Session completed cleanly".to_string(),
            SessionOutcome::WithIssues => "Session completed with unresolved items".to_string(),
            SessionOutcome::Halted(reason) => format!("Session halted: {}", reason),
            SessionOutcome::Cancelled => "Session stopped".to_string(),
        };
        write!(
            f,
            "{} ({} completed, {} error, {} with raw content, {} idle)",
            label, self.completed, self.errors, self.raw_items, self.idle
        )
    }
}

/// What the completion policy decided
enum CompletionStep {
    Requeued,
    Wait,
    Repairing,
    Finished,
}

/// Mutable session state, guarded by the scheduler mutex
#[derive(Debug)]
struct SessionState {
    items: Vec<WorkItem>,
    index: HashMap<String, usize>,
    queue: VecDeque<String>,
    in_flight: usize,
    tier: Tier,
    fix_phase: bool,
    active: bool,
    repairing: bool,
    repair_attempted: bool,
    wake_armed: bool,
    generation: u64,
    rolling: RollingContext,
    prompt: PromptContext,
    settings: SchedulerSettings,
    source_language: String,
}

impl SessionState {
    fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn mode(&self) -> ProfileMode {
        if self.fix_phase {
            ProfileMode::Fix
        } else {
            ProfileMode::Tier(self.tier)
        }
    }

    /// Declared source languages, story metadata first
    fn source_languages(&self) -> Vec<String> {
        if self.prompt.story.source_languages.is_empty() {
            vec![self.source_language.clone()]
        } else {
            self.prompt.story.source_languages.clone()
        }
    }

    fn content_class(&self) -> ContentClass {
        if self.fix_phase {
            // Fix-phase items are raw-heavy by definition
            ContentClass::Complex
        } else {
            content_class_for(&self.source_languages())
        }
    }

    fn primary_language(&self) -> String {
        self.source_languages().into_iter().next().unwrap_or_default()
    }

    fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            active: self.active,
            queued: self.queue.len(),
            in_flight: self.in_flight,
            repairing: self.repairing,
            fix_phase: self.fix_phase,
            tier: self.tier,
        }
    }

    fn report(&self, outcome: SessionOutcome) -> SessionReport {
        let count = |status: ItemStatus| self.items.iter().filter(|i| i.status() == status).count();
        SessionReport {
            outcome,
            completed: count(ItemStatus::Completed),
            errors: count(ItemStatus::Error),
            raw_items: self
                .items
                .iter()
                .filter(|i| i.status() == ItemStatus::Completed && i.raw_chars() > 0)
                .count(),
            idle: count(ItemStatus::Idle),
        }
    }

    /// Reset everything a stop must clear; returns how many items were reset
    fn reset(&mut self) -> usize {
        let mut reset = 0;
        for item in self.items.iter_mut() {
            if item.reset_after_stop() {
                reset += 1;
            }
        }
        self.queue.clear();
        self.in_flight = 0;
        self.rolling.clear();
        self.active = false;
        self.repairing = false;
        self.fix_phase = false;
        self.wake_armed = false;
        self.generation += 1;
        reset
    }
}

struct SchedulerInner {
    state: Mutex<SessionState>,
    ledger: Arc<QuotaLedger>,
    translator: Arc<dyn Translator>,
    repairer: Arc<dyn Repairer>,
    guard: Arc<dyn LanguageGuard>,
    validator: IntegrityValidator,
    profiles: ProfileTable,
    enabled_models: Vec<String>,
    status_tx: watch::Sender<SchedulerStatus>,
    report_tx: broadcast::Sender<SessionReport>,
}

/// Translation session scheduler
///
/// Cheap to clone; clones share one session. Methods that start work spawn
/// tokio tasks and must be called from within a runtime.
#[derive(Clone)]
pub struct TranslationScheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for TranslationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationScheduler")
            .field("status", &self.status())
            .finish()
    }
}

/// Forwards streamed output of one batch into the session
struct SessionSink {
    scheduler: TranslationScheduler,
    generation: u64,
}

impl BatchSink for SessionSink {
    fn on_partial(&self, item_id: &str, text: &str) {
        let mut state = self.scheduler.inner.state.lock();
        if state.generation != self.generation {
            return;
        }
        if let Some(index) = state.position(item_id) {
            state.items[index].apply_partial(text);
        }
    }

    fn on_log(&self, message: &str) {
        info!("[batch] {}", message);
    }
}

impl TranslationScheduler {
    /// Create a scheduler with the default wrong-language guard
    pub fn new(
        config: &Config,
        ledger: Arc<QuotaLedger>,
        translator: Arc<dyn Translator>,
        repairer: Arc<dyn Repairer>,
    ) -> Self {
        Self::with_language_guard(config, ledger, translator, repairer, Arc::new(EnglishStopwordGuard::default()))
    }

    /// Create a scheduler with an explicit wrong-language guard
    pub fn with_language_guard(
        config: &Config,
        ledger: Arc<QuotaLedger>,
        translator: Arc<dyn Translator>,
        repairer: Arc<dyn Repairer>,
        guard: Arc<dyn LanguageGuard>,
    ) -> Self {
        let settings = SchedulerSettings::from(&config.scheduler);
        let state = SessionState {
            items: Vec::new(),
            index: HashMap::new(),
            queue: VecDeque::new(),
            in_flight: 0,
            tier: config.scheduler.default_tier,
            fix_phase: false,
            active: false,
            repairing: false,
            repair_attempted: false,
            wake_armed: false,
            generation: 0,
            rolling: RollingContext::new(settings.rolling_context_chars),
            prompt: PromptContext::default(),
            settings,
            source_language: config.source_language.clone(),
        };
        let (status_tx, _) = watch::channel(state.status());
        let (report_tx, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SchedulerInner {
                state: Mutex::new(state),
                ledger,
                translator,
                repairer,
                guard,
                validator: IntegrityValidator::with_config(config.validation.clone()),
                profiles: ProfileTable::from_tiers(&config.tiers),
                enabled_models: config.enabled_models(),
                status_tx,
                report_tx,
            }),
        }
    }

    /// Replace the item collection
    ///
    /// Items are kept in sort order. Duplicate ids keep the first occurrence.
    pub fn load_items(&self, mut items: Vec<WorkItem>) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock();
        if state.active {
            return Err(SchedulerError::AlreadyRunning);
        }

        items.sort_by_key(|item| item.order);
        let mut seen = HashSet::new();
        items.retain(|item| {
            let fresh = seen.insert(item.id.clone());
            if !fresh {
                warn!("Ignoring duplicate item id {}", item.id);
            }
            fresh
        });

        state.index = items
            .iter()
            .enumerate()
            .map(|(index, item)| (item.id.clone(), index))
            .collect();
        state.items = items;
        state.queue.clear();
        state.rolling.clear();
        self.publish_status(&state);
        Ok(())
    }

    /// Snapshot of every item
    pub fn items(&self) -> Vec<WorkItem> {
        self.inner.state.lock().items.clone()
    }

    /// Snapshot of one item
    pub fn item(&self, id: &str) -> Option<WorkItem> {
        let state = self.inner.state.lock();
        state.position(id).map(|index| state.items[index].clone())
    }

    pub fn set_prompt_context(&self, prompt: PromptContext) {
        self.inner.state.lock().prompt = prompt;
    }

    pub fn prompt_context(&self) -> PromptContext {
        self.inner.state.lock().prompt.clone()
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.inner.state.lock().settings.clone()
    }

    /// Replace the runtime policy; applies from the next scheduling decision
    pub fn configure(&self, settings: SchedulerSettings) {
        let mut state = self.inner.state.lock();
        state.rolling.set_max_chars(settings.rolling_context_chars);
        state.settings = settings;
    }

    pub fn status(&self) -> SchedulerStatus {
        self.inner.state.lock().status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SchedulerStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn subscribe_reports(&self) -> broadcast::Receiver<SessionReport> {
        self.inner.report_tx.subscribe()
    }

    /// Current rolling context text
    pub fn rolling_context(&self) -> Option<String> {
        self.inner.state.lock().rolling.text().map(str::to_string)
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.inner.ledger
    }

    /// Resolve once no session is running
    pub async fn wait_until_idle(&self) {
        let mut status = self.subscribe_status();
        // The sender lives as long as `self`, so this cannot fail
        let _ = status.wait_for(|s| !s.active).await;
    }

    /// Start a translation session over every eligible item
    ///
    /// Eligible items are `Idle` and `Error` ones; `only` narrows the set.
    /// Returns how many items were queued. Zero queued items starts nothing.
    pub fn start(&self, tier: Tier, only: Option<&[String]>) -> Result<usize, SchedulerError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.active {
            return Err(SchedulerError::AlreadyRunning);
        }

        let wanted: Option<HashSet<&str>> = only.map(|ids| ids.iter().map(String::as_str).collect());
        if let Some(wanted) = &wanted {
            if let Some(unknown) = wanted.iter().find(|id| !state.index.contains_key(**id)) {
                return Err(SchedulerError::UnknownItem(unknown.to_string()));
            }
        }

        state.queue.clear();
        for item in state.items.iter_mut() {
            if wanted.as_ref().is_some_and(|w| !w.contains(item.id.as_str())) {
                continue;
            }
            match item.status() {
                ItemStatus::Idle => state.queue.push_back(item.id.clone()),
                ItemStatus::Error => {
                    item.requeue_after_error()?;
                    state.queue.push_back(item.id.clone());
                }
                _ => {}
            }
        }

        let accepted = state.queue.len();
        if accepted == 0 {
            debug!("No eligible items to translate");
            return Ok(0);
        }

        state.tier = tier;
        state.fix_phase = false;
        state.active = true;
        state.repair_attempted = false;
        state.rolling.clear();
        info!("Starting {} session with {} item(s)", tier, accepted);

        self.pump_locked(state);
        Ok(accepted)
    }

    /// Reset items to `Idle` with cleared fields so they are translated again
    ///
    /// While a session runs the items join its queue; otherwise they wait
    /// for the next `start`. Returns how many items were reset.
    pub fn requeue_for_retranslation(&self, ids: &[String]) -> Result<usize, SchedulerError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let mut positions = Vec::with_capacity(ids.len());
        for id in ids {
            let index = state
                .position(id)
                .ok_or_else(|| SchedulerError::UnknownItem(id.clone()))?;
            positions.push(index);
        }

        for &index in &positions {
            state.items[index].reset_for_retranslation()?;
        }

        if state.active {
            for &index in &positions {
                let id = state.items[index].id.clone();
                if !state.queue.contains(&id) {
                    state.queue.push_back(id);
                }
            }
            self.pump_locked(state);
        } else {
            self.publish_status(state);
        }
        Ok(positions.len())
    }

    /// Stop the session; idempotent
    ///
    /// Active items return to `Idle`, the queue is cleared, the in-flight
    /// count is zeroed and the rolling context is cleared. Returns whether a
    /// running session was stopped.
    pub fn stop(&self) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let was_active = state.active;
        let reset = state.reset();

        if was_active {
            debug!("Stop reset {} active item(s)", reset);
            self.emit_report(state, SessionOutcome::Cancelled);
        } else {
            self.publish_status(state);
        }
        was_active
    }

    /// Start an aggregated repair over every completed item with raw lines
    ///
    /// Returns the number of lines submitted. The session then runs until
    /// the repair and any follow-up retries have drained.
    pub fn start_repair(&self) -> Result<usize, SchedulerError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.active {
            return Err(SchedulerError::AlreadyRunning);
        }

        state.active = true;
        state.fix_phase = false;
        state.rolling.clear();
        match self.begin_aggregated_repair_locked(state) {
            Ok(lines) => {
                self.publish_status(state);
                Ok(lines)
            }
            Err(error) => {
                state.active = false;
                self.publish_status(state);
                Err(error)
            }
        }
    }

    /// Repair one completed item
    ///
    /// Heavy raw residue sends the item back for full retranslation at the
    /// fix tier. Otherwise its bad lines are patched in place.
    pub async fn repair_item(&self, id: &str) -> Result<RepairOutcome, SchedulerError> {
        let (request, generation) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let index = state
                .position(id)
                .ok_or_else(|| SchedulerError::UnknownItem(id.to_string()))?;
            let item = &state.items[index];
            if item.status() != ItemStatus::Completed {
                return Err(SchedulerError::InvalidTransition {
                    id: id.to_string(),
                    from: item.status(),
                    to: ItemStatus::Repairing,
                });
            }

            match plan_single_repair(item, state.settings.heavy_raw_threshold) {
                SingleRepairPlan::NothingToFix => return Ok(RepairOutcome::NothingToRepair),
                SingleRepairPlan::Retranslate => {
                    state.items[index].reset_for_retranslation()?;
                    state.items[index].bump_retry();
                    state.queue.push_back(id.to_string());
                    state.fix_phase = true;
                    if !state.active {
                        state.active = true;
                        state.repair_attempted = false;
                        state.rolling.clear();
                    }
                    info!("Item {} has heavy raw residue, retranslating at fix tier", id);
                    self.pump_locked(state);
                    return Ok(RepairOutcome::Requeued(id.to_string()));
                }
                SingleRepairPlan::Patch(lines) => {
                    if self.inner.ledger.viable_models(&self.fix_pool()).is_empty() {
                        return Err(SchedulerError::EmptyModelPool);
                    }
                    state.items[index].begin_repair()?;
                    self.publish_status(state);
                    let request = SingleRepairRequest {
                        item_id: id.to_string(),
                        lines,
                        context: state.prompt.clone(),
                        tier: ProfileMode::Fix,
                    };
                    (request, state.generation)
                }
            }
        };

        let reserved = match self.reserve_fix_model(generation).await {
            Ok(Some(model)) => model,
            Ok(None) => return Ok(RepairOutcome::Failed("Session was stopped during repair".to_string())),
            Err(error) => {
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;
                if let Some(index) = state.position(id) {
                    if state.items[index].status() == ItemStatus::Repairing {
                        state.items[index].finish_repair(None)?;
                    }
                }
                self.publish_status(state);
                return Err(error);
            }
        };
        let result = self.inner.repairer.repair_single(request).await;

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        self.inner.ledger.record_result(&reserved, result.is_ok());
        let index = match state.position(id) {
            Some(index) if state.generation == generation && state.items[index].status() == ItemStatus::Repairing => index,
            _ => return Ok(RepairOutcome::Failed("Session was stopped during repair".to_string())),
        };

        let outcome = match result {
            Ok(fixes) if fixes.is_empty() => {
                state.items[index].finish_repair(None)?;
                RepairOutcome::NotFixable(id.to_string())
            }
            Ok(fixes) => {
                let item = &mut state.items[index];
                let raw_before = item.raw_chars();
                let repaired = item
                    .translated_content()
                    .map(|text| apply_line_fixes(text, &fixes_to_map(fixes)));
                item.finish_repair(repaired)?;
                RepairOutcome::Repaired {
                    items: 1,
                    raw_before,
                    raw_after: item.raw_chars(),
                }
            }
            Err(error) => {
                error!("Repair of item {} failed: {}", id, error);
                state.items[index].finish_repair(None)?;
                RepairOutcome::Failed(error.to_string())
            }
        };

        info!("{}", outcome);
        // A running session may have been waiting on this item
        self.pump_locked(state);
        Ok(outcome)
    }

    /// Apply baseline formatting to every completed item
    ///
    /// Returns how many texts changed.
    pub fn format_all(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut changed = 0;
        for item in state.items.iter_mut().filter(|i| i.status() == ItemStatus::Completed) {
            let Some(text) = item.translated_content() else {
                continue;
            };
            let formatted = TextFormatter::format(text);
            if formatted != text && item.rewrite_completed(formatted) {
                changed += 1;
            }
        }
        info!("Formatted {} completed item(s)", changed);
        changed
    }

    /// Whether the fix pool can take a request right now
    pub fn fix_pool_has_headroom(&self) -> bool {
        self.inner.ledger.has_available(&self.fix_pool())
    }

    fn fix_pool(&self) -> Vec<String> {
        self.inner
            .profiles
            .lookup(ProfileMode::Fix, ContentClass::Complex)
            .model_pool
            .clone()
    }

    fn publish_status(&self, state: &SessionState) {
        self.inner.status_tx.send_replace(state.status());
    }

    /// Log the one terminal summary line and broadcast the report
    fn emit_report(&self, state: &SessionState, outcome: SessionOutcome) {
        let report = state.report(outcome);
        match report.outcome {
            SessionOutcome::Clean | SessionOutcome::Cancelled => info!("{}", report),
            SessionOutcome::WithIssues => warn!("{}", report),
            SessionOutcome::Halted(_) => error!("{}", report),
        }
        // No subscribers is fine
        let _ = self.inner.report_tx.send(report);
        self.publish_status(state);
    }

    /// Emergency stop
    fn halt_locked(&self, state: &mut SessionState, reason: String) {
        state.reset();
        self.emit_report(state, SessionOutcome::Halted(reason));
    }

    /// Natural end of a session
    fn finish_locked(&self, state: &mut SessionState) {
        state.active = false;
        state.fix_phase = false;
        state.generation += 1;
        let unresolved = state
            .items
            .iter()
            .any(|i| i.status() == ItemStatus::Error || (i.status() == ItemStatus::Completed && i.raw_chars() > 0));
        let outcome = if unresolved {
            SessionOutcome::WithIssues
        } else {
            SessionOutcome::Clean
        };
        self.emit_report(state, outcome);
    }

    /// Scheduling loop body; runs until nothing more can be started
    fn pump_locked(&self, state: &mut SessionState) {
        while state.active {
            if state.queue.is_empty() {
                if state.in_flight > 0 || state.repairing {
                    break;
                }
                match self.completion_step(state) {
                    CompletionStep::Requeued => continue,
                    CompletionStep::Wait | CompletionStep::Repairing => break,
                    CompletionStep::Finished => return,
                }
            }

            let mode = state.mode();
            let profile = self.inner.profiles.lookup(mode, state.content_class()).clone();
            if state.in_flight >= profile.concurrency_ceiling {
                break;
            }

            let viable = self.inner.ledger.viable_models(&profile.model_pool);
            if viable.is_empty() {
                self.halt_locked(state, format!("No usable model left in the {} pool", mode));
                return;
            }

            let assembler = BatchAssembler::for_profile(&profile);
            let batch = {
                let items = &state.items;
                let index = &state.index;
                assembler.assemble(&mut state.queue, |id| {
                    index
                        .get(id)
                        .map(|&i| &items[i])
                        .filter(|item| item.status() == ItemStatus::Idle)
                        .map(WorkItem::original_char_count)
                })
            };
            let Some(batch) = batch else {
                // Only stale ids were queued
                continue;
            };

            let Some(model) = self.inner.ledger.try_reserve(&viable) else {
                for id in batch.item_ids.into_iter().rev() {
                    state.queue.push_front(id);
                }
                self.arm_wake(state, &viable);
                break;
            };

            self.launch_batch(state, batch, model, &viable, mode);
        }
        self.publish_status(state);
    }

    /// Completion policy, evaluated when the queue and in-flight count are zero
    fn completion_step(&self, state: &mut SessionState) -> CompletionStep {
        if state.items.iter().any(|i| i.status() == ItemStatus::Repairing) {
            return CompletionStep::Wait;
        }

        let settings = state.settings.clone();
        if settings.smart_auto {
            let retryable: Vec<usize> = state
                .items
                .iter()
                .enumerate()
                .filter(|(_, i)| i.status() == ItemStatus::Error && i.retry_count() < settings.max_error_retries)
                .map(|(index, _)| index)
                .collect();
            if !retryable.is_empty() {
                for &index in &retryable {
                    let item = &mut state.items[index];
                    if item.requeue_after_error().is_ok() {
                        state.queue.push_back(item.id.clone());
                    }
                }
                info!("Retrying {} failed item(s)", retryable.len());
                return CompletionStep::Requeued;
            }

            let heavy: Vec<usize> = state
                .items
                .iter()
                .enumerate()
                .filter(|(_, i)| {
                    i.status() == ItemStatus::Completed
                        && i.raw_chars() > settings.heavy_raw_threshold
                        && i.retry_count() < settings.max_heavy_raw_retries
                })
                .map(|(index, _)| index)
                .collect();
            if !heavy.is_empty() {
                for &index in &heavy {
                    let item = &mut state.items[index];
                    if item.reset_for_retranslation().is_ok() {
                        item.bump_retry();
                        state.queue.push_back(item.id.clone());
                    }
                }
                state.fix_phase = true;
                info!("Retranslating {} raw-heavy item(s) at fix tier", heavy.len());
                return CompletionStep::Requeued;
            }
        }

        if settings.auto_fix
            && !state.repair_attempted
            && state
                .items
                .iter()
                .any(|i| i.status() == ItemStatus::Completed && i.raw_chars() > 0)
            && self.inner.ledger.has_available(&self.fix_pool())
            && self.begin_aggregated_repair_locked(state).is_ok()
        {
            return CompletionStep::Repairing;
        }

        self.finish_locked(state);
        CompletionStep::Finished
    }

    fn launch_batch(&self, state: &mut SessionState, batch: Batch, model: String, pool: &[String], mode: ProfileMode) {
        let mut items = Vec::with_capacity(batch.len());
        for id in &batch.item_ids {
            let Some(index) = state.position(id) else {
                continue;
            };
            let item = &mut state.items[index];
            match item.begin_processing() {
                Ok(()) => items.push(BatchItem {
                    id: id.clone(),
                    text: item.source_text.clone(),
                }),
                Err(error) => warn!("Skipping item in batch: {}", error),
            }
        }

        let delay = state.settings.stagger_delay * state.in_flight as u32;
        state.in_flight += 1;

        let mut candidate_models = vec![model.clone()];
        candidate_models.extend(pool.iter().filter(|id| **id != model).cloned());
        let request = BatchRequest {
            items,
            context: state.prompt.clone(),
            candidate_models,
            rolling_context: state.rolling.text().map(str::to_string),
            tier: mode,
            enabled_models: self.inner.enabled_models.clone(),
        };

        info!(
            "Submitting batch of {} item(s), {} chars, to {} [{}]",
            batch.len(),
            batch.total_chars,
            model,
            mode
        );

        let scheduler = self.clone();
        let translator = Arc::clone(&self.inner.translator);
        let generation = state.generation;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if !scheduler.is_current(generation) {
                    return;
                }
            }
            let sink = SessionSink {
                scheduler: scheduler.clone(),
                generation,
            };
            let started = Instant::now();
            let result = translator.translate(request, &sink).await;
            scheduler.finish_batch(generation, batch.item_ids, model, result, started.elapsed());
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.state.lock().generation == generation
    }

    /// Claim a fix-pool model, waiting out RPM windows and cooldowns
    ///
    /// `Ok(None)` when the session was stopped while waiting.
    async fn reserve_fix_model(&self, generation: u64) -> Result<Option<String>, SchedulerError> {
        let pool = self.fix_pool();
        loop {
            if !self.is_current(generation) {
                return Ok(None);
            }
            if self.inner.ledger.viable_models(&pool).is_empty() {
                return Err(SchedulerError::EmptyModelPool);
            }
            if let Some(model) = self.inner.ledger.try_reserve(&pool) {
                return Ok(Some(model));
            }
            let delay = self
                .inner
                .ledger
                .next_release(&pool)
                .unwrap_or(MIN_WAKE_DELAY)
                .max(MIN_WAKE_DELAY);
            debug!("Fix pool has no headroom, retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    fn finish_batch(
        &self,
        generation: u64,
        item_ids: Vec<String>,
        reserved: String,
        result: Result<BatchResponse, ProviderError>,
        elapsed: Duration,
    ) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.generation != generation || !state.active {
            debug!("Ignoring late result for {} item(s)", item_ids.len());
            return;
        }
        state.in_flight = state.in_flight.saturating_sub(1);

        match result {
            Ok(response) => {
                let quota = response.error_type.as_deref().filter(|kind| is_quota_exhaustion(kind));
                let model = if response.model_used.is_empty() || response.model_used == reserved {
                    self.inner.ledger.record_result(&reserved, quota.is_none());
                    reserved
                } else {
                    // The provider fell back: the reserved model failed, the fallback answered
                    self.inner.ledger.record_result(&reserved, false);
                    if self.inner.ledger.descriptor(&response.model_used).is_some() {
                        self.inner.ledger.record_attempt(&response.model_used);
                        self.inner.ledger.record_result(&response.model_used, quota.is_none());
                    } else {
                        warn!("Provider answered with untracked model {}", response.model_used);
                    }
                    response.model_used.clone()
                };
                if let Some(kind) = quota {
                    self.inner.ledger.mark_depleted(&model);
                    self.halt_locked(state, format!("{} reported: {}", model, kind));
                    return;
                }
                self.apply_batch_results(state, &item_ids, &response, &model, elapsed);
            }
            Err(error) => {
                self.inner.ledger.record_result(&reserved, false);
                let message = error.to_string();
                if error.is_session_fatal() {
                    self.inner.ledger.mark_depleted(&reserved);
                    self.halt_locked(state, message);
                    return;
                }
                for id in &item_ids {
                    if let Some(index) = state.position(id) {
                        fail_item(&mut state.items[index], &message, elapsed);
                    }
                }
            }
        }

        self.pump_locked(state);
    }

    /// Per-item result application: wrong-language guard, then integrity
    fn apply_batch_results(
        &self,
        state: &mut SessionState,
        item_ids: &[String],
        response: &BatchResponse,
        model: &str,
        elapsed: Duration,
    ) {
        let wrong_language = response.error_type.as_deref() == Some(WRONG_LANGUAGE_ERROR);
        let hint = state.primary_language();
        let mut newest: Option<(usize, usize)> = None;

        for id in item_ids {
            let Some(index) = state.position(id) else {
                continue;
            };
            let item = &mut state.items[index];
            if item.status() != ItemStatus::Processing {
                continue;
            }

            let verdict = match response.results.get(id).filter(|text| !text.trim().is_empty()) {
                None => Err("No translation returned for this item".to_string()),
                Some(text) if wrong_language && self.inner.guard.looks_like_wrong_language(text) => {
                    Err("Output appears to be English instead of the target language".to_string())
                }
                Some(text) => {
                    let report = self.inner.validator.validate(&item.source_text, text, &hint);
                    match report.reason() {
                        Some(reason) if !report.valid => Err(reason),
                        _ => Ok(text.clone()),
                    }
                }
            };

            match verdict {
                Ok(text) => match item.complete(text, model, elapsed) {
                    Ok(()) => {
                        if newest.is_none_or(|(order, _)| item.order > order) {
                            newest = Some((item.order, index));
                        }
                    }
                    Err(error) => warn!("{}", error),
                },
                Err(reason) => fail_item(item, &reason, elapsed),
            }
        }

        if let Some((order, index)) = newest {
            if let Some(text) = state.items[index].translated_content() {
                if !state.rolling.advance(order, text) {
                    debug!("Kept newer rolling context over item order {}", order);
                }
            }
        }
    }

    /// Mark completed items with raw lines as repairing and submit one request
    fn begin_aggregated_repair_locked(&self, state: &mut SessionState) -> Result<usize, SchedulerError> {
        let entries = collect_repair_entries(&state.items);
        if entries.is_empty() {
            return Err(SchedulerError::NothingToRepair(
                "no completed item has untranslated lines".to_string(),
            ));
        }

        if self.inner.ledger.viable_models(&self.fix_pool()).is_empty() {
            return Err(SchedulerError::EmptyModelPool);
        }

        let mut ids: Vec<String> = Vec::new();
        for entry in &entries {
            if ids.last() != Some(&entry.item_id) {
                ids.push(entry.item_id.clone());
            }
        }
        for id in &ids {
            if let Some(index) = state.position(id) {
                state.items[index].begin_repair()?;
            }
        }

        state.repairing = true;
        state.repair_attempted = true;
        let lines = entries.len();
        let request = AggregatedRepairRequest {
            entries,
            context: state.prompt.clone(),
            tier: ProfileMode::Fix,
        };
        info!("Repairing {} line(s) across {} item(s)", lines, ids.len());

        let scheduler = self.clone();
        let repairer = Arc::clone(&self.inner.repairer);
        let generation = state.generation;
        tokio::spawn(async move {
            let reserved = match scheduler.reserve_fix_model(generation).await {
                Ok(Some(model)) => model,
                Ok(None) => return,
                Err(error) => {
                    let result = Err(ProviderError::QuotaExhausted(error.to_string()));
                    scheduler.finish_aggregated_repair(generation, ids, None, result);
                    return;
                }
            };
            let on_log = |message: &str| info!("[repair] {}", message);
            let result = repairer.repair_aggregated(request, &on_log).await;
            scheduler.finish_aggregated_repair(generation, ids, Some(reserved), result);
        });
        Ok(lines)
    }

    fn finish_aggregated_repair(
        &self,
        generation: u64,
        ids: Vec<String>,
        reserved: Option<String>,
        result: Result<AggregatedFixes, ProviderError>,
    ) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if state.generation != generation {
            debug!("Ignoring late repair result for {} item(s)", ids.len());
            return;
        }
        state.repairing = false;
        if let Some(model) = &reserved {
            self.inner.ledger.record_result(model, result.is_ok());
        }

        let fatal = match result {
            Ok(fixes) => {
                let mut raw_before = 0;
                let mut raw_after = 0;
                for id in &ids {
                    let Some(index) = state.position(id) else {
                        continue;
                    };
                    let item = &mut state.items[index];
                    if item.status() != ItemStatus::Repairing {
                        continue;
                    }
                    raw_before += item.raw_chars();
                    let repaired = fixes
                        .get(id)
                        .filter(|lines| !lines.is_empty())
                        .and_then(|lines| item.translated_content().map(|text| apply_line_fixes(text, lines)));
                    if let Err(error) = item.finish_repair(repaired) {
                        warn!("{}", error);
                    }
                    raw_after += item.raw_chars();
                }
                info!(
                    "{}",
                    RepairOutcome::Repaired {
                        items: ids.len(),
                        raw_before,
                        raw_after
                    }
                );
                None
            }
            Err(error) => {
                error!("Aggregated repair failed: {}", error);
                for id in &ids {
                    if let Some(index) = state.position(id) {
                        let item = &mut state.items[index];
                        if item.status() == ItemStatus::Repairing {
                            // Unmodified back to Completed
                            let _ = item.finish_repair(None);
                        }
                    }
                }
                error.is_session_fatal().then(|| error.to_string())
            }
        };

        if let Some(reason) = fatal {
            if let Some(model) = &reserved {
                self.inner.ledger.mark_depleted(model);
            }
            self.halt_locked(state, reason);
            return;
        }
        self.pump_locked(state);
    }

    /// Arm one timer for the next quota release
    fn arm_wake(&self, state: &mut SessionState, pool: &[String]) {
        if state.wake_armed {
            return;
        }
        let Some(delay) = self.inner.ledger.next_release(pool) else {
            return;
        };
        let delay = delay.max(MIN_WAKE_DELAY);
        state.wake_armed = true;
        debug!("No model has headroom, waking in {:?}", delay);

        let scheduler = self.clone();
        let generation = state.generation;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut guard = scheduler.inner.state.lock();
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }
            state.wake_armed = false;
            scheduler.pump_locked(state);
        });
    }
}

/// `Processing -> Error` with a logged reason
fn fail_item(item: &mut WorkItem, reason: &str, elapsed: Duration) {
    match item.fail(reason, elapsed) {
        Ok(()) => warn!("Item {} failed: {}", item.id, reason),
        Err(error) => debug!("{}", error),
    }
}
