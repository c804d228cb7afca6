/*!
 * Quota ledger shared by every concurrently running batch.
 *
 * All counters sit behind one mutex; every public operation takes the lock
 * exactly once, so a pick followed by a reservation cannot interleave with
 * another batch's reservation (`try_reserve`).
 */

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::{Config, SchedulerConfig};

use super::clock::{Clock, SystemClock};
use super::models::{ModelDescriptor, ModelUsage, RPM_WINDOW_SECS};

/// Longest error cooldown accepted from configuration
const MAX_COOLDOWN_SECS: u64 = 86_400;

/// Cooldown policy applied after repeated failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerPolicy {
    /// Consecutive failures that trigger a cooldown (0 disables it)
    pub error_cooldown_threshold: u32,
    /// Length of that cooldown
    pub error_cooldown: TimeDelta,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            error_cooldown_threshold: 3,
            error_cooldown: TimeDelta::seconds(60),
        }
    }
}

impl From<&SchedulerConfig> for LedgerPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            error_cooldown_threshold: config.error_cooldown_threshold,
            error_cooldown: TimeDelta::seconds(config.error_cooldown_secs.min(MAX_COOLDOWN_SECS) as i64),
        }
    }
}

/// Per-model usage tracker and model selector
#[derive(Debug)]
pub struct QuotaLedger {
    descriptors: HashMap<String, ModelDescriptor>,
    usage: Mutex<HashMap<String, ModelUsage>>,
    clock: Arc<dyn Clock>,
    policy: LedgerPolicy,
}

impl QuotaLedger {
    /// Create a ledger on the system clock
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self::with_clock(models, Arc::new(SystemClock), LedgerPolicy::default())
    }

    /// Create a ledger for the configured models and cooldown policy
    pub fn from_config(config: &Config) -> Self {
        Self::with_clock(
            config.models.clone(),
            Arc::new(SystemClock),
            LedgerPolicy::from(&config.scheduler),
        )
    }

    /// Create a ledger with an explicit clock and policy
    pub fn with_clock(models: Vec<ModelDescriptor>, clock: Arc<dyn Clock>, policy: LedgerPolicy) -> Self {
        let now = clock.now();
        let usage = models
            .iter()
            .map(|model| (model.id.clone(), ModelUsage::new(now)))
            .collect();
        let descriptors = models
            .into_iter()
            .map(|model| (model.id.clone(), model))
            .collect();

        Self {
            descriptors,
            usage: Mutex::new(usage),
            clock,
            policy,
        }
    }

    /// Static configuration for a model
    pub fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(model_id)
    }

    /// Snapshot of a model's counters
    pub fn usage(&self, model_id: &str) -> Option<ModelUsage> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        usage.get_mut(model_id).map(|entry| {
            entry.refresh(now);
            entry.clone()
        })
    }

    /// Record that a request is about to be sent to `model_id`
    pub fn record_attempt(&self, model_id: &str) {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        if let Some(entry) = usage.get_mut(model_id) {
            Self::record_attempt_locked(entry, now);
        }
    }

    /// Record the outcome of a request
    pub fn record_result(&self, model_id: &str, success: bool) {
        let now = self.clock.now();
        let Some(descriptor) = self.descriptors.get(model_id) else {
            return;
        };

        let mut usage = self.usage.lock();
        let Some(entry) = usage.get_mut(model_id) else {
            return;
        };
        entry.refresh(now);

        if success {
            entry.consecutive_errors = 0;
        } else {
            entry.consecutive_errors += 1;
            let threshold = self.policy.error_cooldown_threshold;
            if threshold > 0 && entry.consecutive_errors >= threshold {
                warn!(
                    "Model {} failed {} times in a row, cooling down for {}s",
                    model_id,
                    entry.consecutive_errors,
                    self.policy.error_cooldown.num_seconds()
                );
                entry.cooldown_until = Some(now + self.policy.error_cooldown);
            }
        }

        if descriptor.rpd > 0 && entry.requests_today >= descriptor.rpd {
            debug!("Model {} reached its daily limit of {}", model_id, descriptor.rpd);
            entry.depleted = true;
        }
    }

    /// Mark a model as out of daily quota
    pub fn mark_depleted(&self, model_id: &str) {
        let mut usage = self.usage.lock();
        if let Some(entry) = usage.get_mut(model_id) {
            entry.depleted = true;
        }
    }

    /// Put a model into cooldown for `duration`
    pub fn set_cooldown(&self, model_id: &str, duration: TimeDelta) {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        if let Some(entry) = usage.get_mut(model_id) {
            entry.cooldown_until = Some(now + duration);
        }
    }

    pub fn is_depleted(&self, model_id: &str) -> bool {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        usage.get_mut(model_id).is_some_and(|entry| {
            entry.refresh(now);
            entry.depleted
        })
    }

    /// Whether any candidate can take a request right now
    pub fn has_available(&self, model_ids: &[String]) -> bool {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        self.best_locked(&mut usage, model_ids, now).is_some()
    }

    /// Most preferred candidate that can take a request right now
    ///
    /// `None` means "wait", not an error.
    pub fn pick_best(&self, model_ids: &[String]) -> Option<String> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        self.best_locked(&mut usage, model_ids, now)
    }

    /// Pick the best candidate and record an attempt against it atomically
    pub fn try_reserve(&self, model_ids: &[String]) -> Option<String> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        let picked = self.best_locked(&mut usage, model_ids, now)?;
        if let Some(entry) = usage.get_mut(&picked) {
            Self::record_attempt_locked(entry, now);
        }
        Some(picked)
    }

    /// Candidates that are enabled and not out of daily quota
    ///
    /// Models in cooldown or without RPM headroom still count: they will come back.
    pub fn viable_models(&self, model_ids: &[String]) -> Vec<String> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        model_ids
            .iter()
            .filter(|id| {
                let Some(descriptor) = self.descriptors.get(id.as_str()) else {
                    return false;
                };
                let Some(entry) = usage.get_mut(id.as_str()) else {
                    return false;
                };
                entry.refresh(now);
                descriptor.enabled && !entry.daily_exhausted(descriptor.rpd)
            })
            .cloned()
            .collect()
    }

    /// How long until some candidate becomes usable
    ///
    /// `Some(ZERO)` when one is usable now, `None` when none ever will be today.
    pub fn next_release(&self, model_ids: &[String]) -> Option<Duration> {
        let now = self.clock.now();
        let mut usage = self.usage.lock();
        let mut earliest: Option<DateTime<Utc>> = None;

        for id in model_ids {
            let Some(descriptor) = self.descriptors.get(id.as_str()) else {
                continue;
            };
            let Some(entry) = usage.get_mut(id.as_str()) else {
                continue;
            };
            entry.refresh(now);
            if !descriptor.enabled || entry.daily_exhausted(descriptor.rpd) {
                continue;
            }

            let mut ready_at = now;
            if let Some(until) = entry.cooldown_until {
                ready_at = ready_at.max(until);
            }
            if !entry.has_rpm_headroom(descriptor.rpm) {
                // The slot frees when the oldest request in the full window ages out
                let overflow = entry.recent_requests.len() + 1 - descriptor.rpm as usize;
                if let Some(ts) = entry.recent_requests.get(overflow - 1) {
                    ready_at = ready_at.max(*ts + TimeDelta::seconds(RPM_WINDOW_SECS));
                }
            }

            earliest = Some(earliest.map_or(ready_at, |current| current.min(ready_at)));
        }

        earliest.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    fn record_attempt_locked(entry: &mut ModelUsage, now: DateTime<Utc>) {
        entry.refresh(now);
        entry.recent_requests.push_back(now);
        entry.requests_today += 1;
    }

    fn best_locked(
        &self,
        usage: &mut HashMap<String, ModelUsage>,
        model_ids: &[String],
        now: DateTime<Utc>,
    ) -> Option<String> {
        model_ids
            .iter()
            .filter_map(|id| {
                let descriptor = self.descriptors.get(id.as_str())?;
                let entry = usage.get_mut(id.as_str())?;
                entry.refresh(now);
                let usable = descriptor.enabled
                    && !entry.daily_exhausted(descriptor.rpd)
                    && !entry.in_cooldown(now)
                    && entry.has_rpm_headroom(descriptor.rpm);
                usable.then_some(descriptor)
            })
            .min_by_key(|descriptor| descriptor.priority)
            .map(|descriptor| descriptor.id.clone())
    }
}
