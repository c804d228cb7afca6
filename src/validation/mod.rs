/*!
 * Validation module for translation acceptance.
 *
 * - `integrity`: length-ratio plausibility of a translated chapter
 * - `language_guard`: detection of output written in the wrong language
 */

pub mod integrity;
pub mod language_guard;

// Re-export main types
pub use integrity::{
    IntegrityConfig, IntegrityIssue, IntegrityReport, IntegrityValidator, RatioBand, RatioLimits,
    validate,
};
pub use language_guard::{EnglishStopwordGuard, LanguageGuard};
