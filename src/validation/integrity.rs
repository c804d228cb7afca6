/*!
 * Integrity validation for translated chapters.
 *
 * This module decides whether a translation is plausible given its source:
 * - Empty translation detection (content lost)
 * - Length ratio bands per source language class
 * - Leniency for short sources and for boilerplate-heavy text
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language_utils::{LanguageClass, classify_language};

/// Sources shorter than this skip the ratio bands
const DEFAULT_SHORT_SOURCE_THRESHOLD: usize = 200;

/// Expansion ratio that is rejected even for short sources
const DEFAULT_ABSURD_EXPANSION_RATIO: f64 = 10.0;

/// Lower bound used when boilerplate markers are present
const DEFAULT_JUNK_FLOOR: f64 = 0.3;

/// Boilerplate that legitimately shrinks or disappears in translation:
/// donation pleas, site watermarks, author and translator notes.
static JUNK_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)(patreon|ko-fi|paypal|donat(e|ion)|support (me|us|the (author|translator))",
        r"|author'?s? note|translator'?s? note|\btl note\b|\ba/n\b",
        r"|www\.|\.com\b|read (it )?(at|on) ",
        r"|打赏|求月票|推荐票|作者的话|本章完|笔趣阁|起点中文",
        r"|ủng hộ|tác giả nói)"
    ))
    .expect("junk marker regex is valid")
});

/// Acceptable output/input length ratio range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioBand {
    pub min: f64,
    pub max: f64,
}

impl RatioBand {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Ratio bands for each source language class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioLimits {
    pub vietnamese: RatioBand,
    pub english: RatioBand,
    pub krjp: RatioBand,
    pub chinese: RatioBand,
}

impl RatioLimits {
    /// Band for a language class
    pub fn band_for(&self, class: LanguageClass) -> RatioBand {
        match class {
            LanguageClass::Vietnamese => self.vietnamese,
            LanguageClass::English => self.english,
            LanguageClass::Krjp => self.krjp,
            LanguageClass::Chinese => self.chinese,
        }
    }
}

impl Default for RatioLimits {
    fn default() -> Self {
        // Logographic and syllabic sources expand when rendered alphabetically
        Self {
            vietnamese: RatioBand::new(0.6, 1.4),
            english: RatioBand::new(0.8, 1.5),
            krjp: RatioBand::new(1.2, 3.5),
            chinese: RatioBand::new(1.5, 4.0),
        }
    }
}

/// Reasons a translation is rejected
#[derive(Debug, Clone, PartialEq)]
pub enum IntegrityIssue {
    /// Translation is empty while the source is not
    ContentLost,
    /// Short source expanded beyond any plausible translation
    AbsurdExpansion { ratio: f64, max_ratio: f64 },
    /// Translation is below the language band
    TooShort {
        ratio: f64,
        min_ratio: f64,
        language: LanguageClass,
    },
    /// Translation is above the language band
    TooLong {
        ratio: f64,
        max_ratio: f64,
        language: LanguageClass,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::ContentLost => {
                write!(f, "Content lost: translation is empty")
            }
            IntegrityIssue::AbsurdExpansion { ratio, max_ratio } => {
                write!(
                    f,
                    "Too long, likely fabricated content: ratio {:.2} > {:.2} on a short source",
                    ratio, max_ratio
                )
            }
            IntegrityIssue::TooShort {
                ratio,
                min_ratio,
                language,
            } => {
                write!(
                    f,
                    "Too short, likely truncated: ratio {:.2} < {:.2} ({})",
                    ratio, min_ratio, language
                )
            }
            IntegrityIssue::TooLong {
                ratio,
                max_ratio,
                language,
            } => {
                write!(
                    f,
                    "Too long, likely fabricated content: ratio {:.2} > {:.2} ({})",
                    ratio, max_ratio, language
                )
            }
        }
    }
}

/// Outcome of validating one translation
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    /// Whether the translation is accepted
    pub valid: bool,
    /// Why it was rejected
    pub issue: Option<IntegrityIssue>,
    /// Translated length / source length, in characters
    pub ratio: f64,
    /// Language class used for the band check (None when bands were skipped)
    pub language: Option<LanguageClass>,
}

impl IntegrityReport {
    fn accepted(ratio: f64, language: Option<LanguageClass>) -> Self {
        Self {
            valid: true,
            issue: None,
            ratio,
            language,
        }
    }

    fn rejected(ratio: f64, language: Option<LanguageClass>, issue: IntegrityIssue) -> Self {
        Self {
            valid: false,
            issue: Some(issue),
            ratio,
            language,
        }
    }

    /// Human-readable rejection reason
    pub fn reason(&self) -> Option<String> {
        self.issue.as_ref().map(|issue| issue.to_string())
    }
}

/// Configuration for integrity validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityConfig {
    /// Explicit ratio bands; defaults apply when absent
    #[serde(default)]
    pub ratio_limits: Option<RatioLimits>,

    /// Sources shorter than this (in characters) skip the bands
    #[serde(default = "default_short_source_threshold")]
    pub short_source_threshold: usize,

    /// Maximum ratio accepted for short sources
    #[serde(default = "default_absurd_expansion_ratio")]
    pub absurd_expansion_ratio: f64,

    /// Lower bound used when boilerplate markers are present
    #[serde(default = "default_junk_floor")]
    pub junk_floor: f64,
}

fn default_short_source_threshold() -> usize {
    DEFAULT_SHORT_SOURCE_THRESHOLD
}

fn default_absurd_expansion_ratio() -> f64 {
    DEFAULT_ABSURD_EXPANSION_RATIO
}

fn default_junk_floor() -> f64 {
    DEFAULT_JUNK_FLOOR
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            ratio_limits: None,
            short_source_threshold: DEFAULT_SHORT_SOURCE_THRESHOLD,
            absurd_expansion_ratio: DEFAULT_ABSURD_EXPANSION_RATIO,
            junk_floor: DEFAULT_JUNK_FLOOR,
        }
    }
}

/// Validate a translation with default thresholds
pub fn validate(
    source: &str,
    translated: &str,
    ratio_limits: Option<&RatioLimits>,
    source_language_hint: &str,
) -> IntegrityReport {
    let config = IntegrityConfig {
        ratio_limits: ratio_limits.cloned(),
        ..IntegrityConfig::default()
    };
    IntegrityValidator::with_config(config).validate(source, translated, source_language_hint)
}

/// Whether either text carries boilerplate markers
pub fn contains_junk_markers(text: &str) -> bool {
    JUNK_MARKERS.is_match(text)
}

/// Integrity validator for chapter translations
#[derive(Debug, Clone, Default)]
pub struct IntegrityValidator {
    config: IntegrityConfig,
}

impl IntegrityValidator {
    /// Create a new validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new validator with custom configuration
    pub fn with_config(config: IntegrityConfig) -> Self {
        Self { config }
    }

    /// Calculate the length ratio between translated and source text
    pub fn calculate_ratio(source: &str, translated: &str) -> f64 {
        let source_len = source.trim().chars().count();
        let translated_len = translated.trim().chars().count();

        if source_len == 0 {
            if translated_len == 0 {
                1.0
            } else {
                f64::INFINITY
            }
        } else {
            translated_len as f64 / source_len as f64
        }
    }

    /// Validate a single translation
    ///
    /// Pure: identical inputs always produce identical reports.
    pub fn validate(&self, source: &str, translated: &str, source_language_hint: &str) -> IntegrityReport {
        let source_len = source.trim().chars().count();
        let translated_len = translated.trim().chars().count();
        let ratio = Self::calculate_ratio(source, translated);

        if source_len > 0 && translated_len == 0 {
            return IntegrityReport::rejected(0.0, None, IntegrityIssue::ContentLost);
        }

        if source_len < self.config.short_source_threshold {
            if ratio > self.config.absurd_expansion_ratio {
                return IntegrityReport::rejected(
                    ratio,
                    None,
                    IntegrityIssue::AbsurdExpansion {
                        ratio,
                        max_ratio: self.config.absurd_expansion_ratio,
                    },
                );
            }
            return IntegrityReport::accepted(ratio, None);
        }

        let language = classify_language(source_language_hint);
        let band = self
            .config
            .ratio_limits
            .as_ref()
            .map(|limits| limits.band_for(language))
            .unwrap_or_else(|| RatioLimits::default().band_for(language));

        let min_ratio = if contains_junk_markers(source) || contains_junk_markers(translated) {
            band.min.min(self.config.junk_floor)
        } else {
            band.min
        };

        if ratio < min_ratio {
            debug!(
                "Integrity check failed: ratio {:.2} below {:.2} for {}",
                ratio, min_ratio, language
            );
            return IntegrityReport::rejected(
                ratio,
                Some(language),
                IntegrityIssue::TooShort {
                    ratio,
                    min_ratio,
                    language,
                },
            );
        }

        if ratio > band.max {
            debug!(
                "Integrity check failed: ratio {:.2} above {:.2} for {}",
                ratio, band.max, language
            );
            return IntegrityReport::rejected(
                ratio,
                Some(language),
                IntegrityIssue::TooLong {
                    ratio,
                    max_ratio: band.max,
                    language,
                },
            );
        }

        IntegrityReport::accepted(ratio, Some(language))
    }
}
