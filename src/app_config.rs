use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::default::Default;
use std::path::Path;

use crate::quota::ModelDescriptor;
use crate::validation::IntegrityConfig;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Declared source language (free text or ISO code)
    pub source_language: String,

    /// Target language, passed through to the translation collaborator
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Model endpoints and their quotas
    #[serde(default = "default_models")]
    pub models: Vec<ModelDescriptor>,

    /// Model pools and batch limits per tier
    #[serde(default)]
    pub tiers: TierTable,

    /// Scheduling policy
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Integrity validation thresholds
    #[serde(default)]
    pub validation: IntegrityConfig,

    /// Automation pipeline settings
    #[serde(default)]
    pub automation: AutomationConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Quality/cost preference selecting a model pool and concurrency ceiling
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Flash,
    #[default]
    Normal,
    Pro,
}

impl Tier {
    // @returns: Lowercase tier identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Normal => "normal",
            Self::Pro => "pro",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "flash" => Ok(Self::Flash),
            "normal" => Ok(Self::Normal),
            "pro" => Ok(Self::Pro),
            _ => Err(anyhow!("Invalid tier: {}", s)),
        }
    }
}

/// Batch size limits for one content class
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct BatchLimits {
    /// Item-count target per batch
    pub max_items: usize,

    /// Total source characters per batch
    pub max_chars: usize,
}

impl BatchLimits {
    pub const fn new(max_items: usize, max_chars: usize) -> Self {
        Self { max_items, max_chars }
    }
}

/// Model pool and limits for one tier (or the fix phase)
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TierProfileConfig {
    /// Candidate model ids
    pub models: Vec<String>,

    /// Maximum batches in flight
    pub max_concurrency: usize,

    /// Limits for latin-script content
    pub simple: BatchLimits,

    /// Limits for CJK or raw-heavy content
    pub complex: BatchLimits,
}

/// Profiles for every tier plus the fix phase
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TierTable {
    #[serde(default = "default_flash_profile")]
    pub flash: TierProfileConfig,

    #[serde(default = "default_normal_profile")]
    pub normal: TierProfileConfig,

    #[serde(default = "default_pro_profile")]
    pub pro: TierProfileConfig,

    /// Forced high-quality profile used for heavy retries and repair
    #[serde(default = "default_fix_profile")]
    pub fix: TierProfileConfig,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            flash: default_flash_profile(),
            normal: default_normal_profile(),
            pro: default_pro_profile(),
            fix: default_fix_profile(),
        }
    }
}

impl TierTable {
    /// Profile for a nominal tier
    pub fn profile(&self, tier: Tier) -> &TierProfileConfig {
        match tier {
            Tier::Flash => &self.flash,
            Tier::Normal => &self.normal,
            Tier::Pro => &self.pro,
        }
    }

    fn all(&self) -> [(&'static str, &TierProfileConfig); 4] {
        [
            ("flash", &self.flash),
            ("normal", &self.normal),
            ("pro", &self.pro),
            ("fix", &self.fix),
        ]
    }
}

/// Scheduling policy
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Tier used when a run does not name one
    #[serde(default)]
    pub default_tier: Tier,

    /// Retry errors and heavy-raw items automatically once the queue drains
    #[serde(default = "default_true")]
    pub smart_auto: bool,

    /// Hand residual raw lines to the repair pipeline once the queue drains
    #[serde(default = "default_true")]
    pub auto_fix: bool,

    /// Retry ceiling for items in `Error`
    #[serde(default = "default_max_error_retries")]
    pub max_error_retries: u32,

    /// Retry ceiling for completed items with heavy raw residue
    #[serde(default = "default_max_heavy_raw_retries")]
    pub max_heavy_raw_retries: u32,

    /// Raw characters above which an item needs full retranslation
    #[serde(default = "default_heavy_raw_threshold")]
    pub heavy_raw_threshold: usize,

    /// Delay before a second or later concurrent submission (milliseconds)
    #[serde(default = "default_stagger_delay_ms")]
    pub stagger_delay_ms: u64,

    /// Trailing characters of the last completed item fed to the next batch
    #[serde(default = "default_rolling_context_chars")]
    pub rolling_context_chars: usize,

    /// Consecutive failures before a model is cooled down (0 disables)
    #[serde(default = "default_error_cooldown_threshold")]
    pub error_cooldown_threshold: u32,

    /// Cooldown length after repeated failures (seconds)
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_tier: Tier::default(),
            smart_auto: true,
            auto_fix: true,
            max_error_retries: default_max_error_retries(),
            max_heavy_raw_retries: default_max_heavy_raw_retries(),
            heavy_raw_threshold: default_heavy_raw_threshold(),
            stagger_delay_ms: default_stagger_delay_ms(),
            rolling_context_chars: default_rolling_context_chars(),
            error_cooldown_threshold: default_error_cooldown_threshold(),
            error_cooldown_secs: default_error_cooldown_secs(),
        }
    }
}

/// Automation pipeline settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AutomationConfig {
    /// Recovery cooldown between steps (seconds)
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_true() -> bool {
    true
}

fn default_target_language() -> String {
    "Vietnamese".to_string()
}

fn default_max_error_retries() -> u32 {
    3
}

fn default_max_heavy_raw_retries() -> u32 {
    2
}

fn default_heavy_raw_threshold() -> usize {
    100
}

fn default_stagger_delay_ms() -> u64 {
    1500
}

fn default_rolling_context_chars() -> usize {
    1200
}

fn default_error_cooldown_threshold() -> u32 {
    3
}

fn default_error_cooldown_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gemini-2.5-pro", 5, 100, 0),
        ModelDescriptor::new("gemini-2.5-flash", 10, 250, 1),
        ModelDescriptor::new("gemini-2.5-flash-lite", 15, 1000, 2),
    ]
}

fn default_flash_profile() -> TierProfileConfig {
    TierProfileConfig {
        models: vec!["gemini-2.5-flash-lite".to_string(), "gemini-2.5-flash".to_string()],
        max_concurrency: 4,
        simple: BatchLimits::new(8, 60_000),
        complex: BatchLimits::new(5, 30_000),
    }
}

fn default_normal_profile() -> TierProfileConfig {
    TierProfileConfig {
        models: vec!["gemini-2.5-flash".to_string(), "gemini-2.5-flash-lite".to_string()],
        max_concurrency: 3,
        simple: BatchLimits::new(5, 40_000),
        complex: BatchLimits::new(3, 20_000),
    }
}

fn default_pro_profile() -> TierProfileConfig {
    TierProfileConfig {
        models: vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()],
        max_concurrency: 2,
        simple: BatchLimits::new(3, 30_000),
        complex: BatchLimits::new(2, 15_000),
    }
}

fn default_fix_profile() -> TierProfileConfig {
    TierProfileConfig {
        models: vec!["gemini-2.5-pro".to_string()],
        max_concurrency: 1,
        simple: BatchLimits::new(2, 20_000),
        complex: BatchLimits::new(1, 12_000),
    }
}

impl Config {
    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load a configuration file, writing the defaults first when it does not exist
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            return Ok((Self::from_file(path)?, false));
        }
        let config = Config::default();
        config.save(path)?;
        Ok((config, true))
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(anyhow!("At least one model must be configured"));
        }

        let mut ids = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(anyhow!("Model ids must not be empty"));
            }
            if !ids.insert(model.id.as_str()) {
                return Err(anyhow!("Duplicate model id: {}", model.id));
            }
        }

        for (name, profile) in self.tiers.all() {
            if profile.models.is_empty() {
                return Err(anyhow!("Tier '{}' has an empty model pool", name));
            }
            if let Some(unknown) = profile.models.iter().find(|id| !ids.contains(id.as_str())) {
                return Err(anyhow!("Tier '{}' references unknown model '{}'", name, unknown));
            }
            if profile.max_concurrency == 0 {
                return Err(anyhow!("Tier '{}' must allow at least one batch in flight", name));
            }
            for limits in [profile.simple, profile.complex] {
                if limits.max_items == 0 || limits.max_chars == 0 {
                    return Err(anyhow!("Tier '{}' has a zero batch limit", name));
                }
            }
        }

        if let Some(limits) = &self.validation.ratio_limits {
            for band in [limits.vietnamese, limits.english, limits.krjp, limits.chinese] {
                if band.min <= 0.0 || band.min >= band.max {
                    return Err(anyhow!(
                        "Invalid ratio band {:.2}..{:.2}: min must be positive and below max",
                        band.min,
                        band.max
                    ));
                }
            }
        }

        Ok(())
    }

    /// Enabled model ids, in configuration order
    pub fn enabled_models(&self) -> Vec<String> {
        self.models
            .iter()
            .filter(|model| model.enabled)
            .map(|model| model.id.clone())
            .collect()
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "Chinese".to_string(),
            target_language: default_target_language(),
            models: default_models(),
            tiers: TierTable::default(),
            scheduler: SchedulerConfig::default(),
            validation: IntegrityConfig::default(),
            automation: AutomationConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}
