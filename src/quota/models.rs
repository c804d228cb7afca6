/*!
 * Static model configuration and mutable per-model usage counters.
 */

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Length of the rolling requests-per-minute window
pub const RPM_WINDOW_SECS: i64 = 60;

/// Static configuration of one model endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier sent to the translation collaborator
    pub id: String,

    /// Requests-per-minute limit (0 = unlimited)
    #[serde(default)]
    pub rpm: u32,

    /// Requests-per-day limit (0 = unlimited)
    #[serde(default)]
    pub rpd: u32,

    /// Priority rank, lower is preferred
    #[serde(default)]
    pub priority: u32,

    /// Maximum output size in tokens
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Disabled models are never picked
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_output_tokens() -> u32 {
    8192
}

fn default_true() -> bool {
    true
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, rpm: u32, rpd: u32, priority: u32) -> Self {
        Self {
            id: id.into(),
            rpm,
            rpd,
            priority,
            max_output_tokens: default_max_output_tokens(),
            enabled: true,
        }
    }
}

/// Runtime counters for one model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelUsage {
    /// Requests consumed on `day`
    pub requests_today: u32,
    /// Date stamp for the daily counter
    pub day: NaiveDate,
    /// Timestamps of requests inside the RPM window, oldest first
    pub recent_requests: VecDeque<DateTime<Utc>>,
    /// No requests before this instant
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Daily cap reached
    pub depleted: bool,
    /// Failures since the last success
    pub consecutive_errors: u32,
}

impl ModelUsage {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            requests_today: 0,
            day: now.date_naive(),
            recent_requests: VecDeque::new(),
            cooldown_until: None,
            depleted: false,
            consecutive_errors: 0,
        }
    }

    /// Reset the daily counter on a new day and drop timestamps outside the window
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != today {
            self.day = today;
            self.requests_today = 0;
            self.depleted = false;
        }

        let window_start = now - TimeDelta::seconds(RPM_WINDOW_SECS);
        while self
            .recent_requests
            .front()
            .is_some_and(|ts| *ts <= window_start)
        {
            self.recent_requests.pop_front();
        }

        if self.cooldown_until.is_some_and(|until| until <= now) {
            self.cooldown_until = None;
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Whether another request fits in the current RPM window
    pub fn has_rpm_headroom(&self, rpm: u32) -> bool {
        rpm == 0 || (self.recent_requests.len() as u32) < rpm
    }

    /// Whether the daily allowance is used up (flag or counter)
    pub fn daily_exhausted(&self, rpd: u32) -> bool {
        self.depleted || (rpd > 0 && self.requests_today >= rpd)
    }
}
