/*!
 * Scheduling profiles per tier and content class.
 *
 * Every scheduling tick resolves one `SchedulingProfile` from the
 * `(tier or fix phase, content class)` pair. The table is built once from
 * the configured `TierTable`, so scheduling decisions never branch on the
 * tier themselves.
 */

use std::collections::HashMap;

use crate::app_config::{BatchLimits, Tier, TierProfileConfig, TierTable};
use crate::language_utils::{ContentClass, classify_language};

/// Mode selecting a row of the profile table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileMode {
    /// Normal translation at a nominal tier
    Tier(Tier),
    /// Forced high-quality pool for heavy retries and repair
    Fix,
}

impl std::fmt::Display for ProfileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileMode::Tier(tier) => write!(f, "{}", tier),
            ProfileMode::Fix => write!(f, "fix"),
        }
    }
}

/// Resolved scheduling parameters for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingProfile {
    /// Candidate model ids, in preference order
    pub model_pool: Vec<String>,
    /// Maximum batches in flight
    pub concurrency_ceiling: usize,
    /// Maximum items per batch
    pub item_target: usize,
    /// Maximum total source characters per batch
    pub char_budget: usize,
}

impl SchedulingProfile {
    fn from_config(config: &TierProfileConfig, limits: BatchLimits) -> Self {
        Self {
            model_pool: config.models.clone(),
            concurrency_ceiling: config.max_concurrency.max(1),
            item_target: limits.max_items.max(1),
            char_budget: limits.max_chars.max(1),
        }
    }
}

/// Lookup table keyed by `(ProfileMode, ContentClass)`
#[derive(Debug, Clone)]
pub struct ProfileTable {
    rows: HashMap<(ProfileMode, ContentClass), SchedulingProfile>,
}

impl ProfileTable {
    /// Build the table from tier configuration
    pub fn from_tiers(tiers: &TierTable) -> Self {
        let modes = [
            (ProfileMode::Tier(Tier::Flash), &tiers.flash),
            (ProfileMode::Tier(Tier::Normal), &tiers.normal),
            (ProfileMode::Tier(Tier::Pro), &tiers.pro),
            (ProfileMode::Fix, &tiers.fix),
        ];

        let mut rows = HashMap::new();
        for (mode, config) in modes {
            rows.insert(
                (mode, ContentClass::Simple),
                SchedulingProfile::from_config(config, config.simple),
            );
            rows.insert(
                (mode, ContentClass::Complex),
                SchedulingProfile::from_config(config, config.complex),
            );
        }

        Self { rows }
    }

    /// Profile for a mode and content class
    pub fn lookup(&self, mode: ProfileMode, class: ContentClass) -> &SchedulingProfile {
        // Every (mode, class) pair is inserted by `from_tiers`
        &self.rows[&(mode, class)]
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::from_tiers(&TierTable::default())
    }
}

/// Content class implied by the declared source languages
///
/// Any CJK source makes the whole collection complex. No hints at all is
/// treated like an unknown hint, which classifies as Chinese.
pub fn content_class_for<S: AsRef<str>>(source_languages: &[S]) -> ContentClass {
    if source_languages.is_empty() {
        return classify_language("").content_class();
    }
    if source_languages
        .iter()
        .any(|hint| classify_language(hint.as_ref()).content_class() == ContentClass::Complex)
    {
        ContentClass::Complex
    } else {
        ContentClass::Simple
    }
}
