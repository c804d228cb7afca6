/*!
 * # chapterflow
 *
 * Quota-aware batch scheduler for translating long chapter collections
 * through rate-limited model endpoints.
 *
 * ## Features
 *
 * - Per-model request accounting with RPM windows and daily caps
 * - Greedy batch assembly under an item target and a character budget
 * - Tiered scheduling profiles by content class
 * - Length-ratio integrity checks and wrong-language detection
 * - Automatic retries, heavy-raw re-translation and aggregated line repair
 * - A six-step automation pipeline with review pauses and cooldowns
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `app_config`: Configuration management
 * - `quota`: Model descriptors, usage counters and the shared ledger
 * - `validation`: Integrity validator and language guard
 * - `translation`: Work items, batching and the session scheduler:
 *   - `translation::scheduler`: Session scheduler
 *   - `translation::batch`: Batch assembly
 *   - `translation::repair`: Repair pipeline helpers
 * - `automation`: Six-step automation pipeline
 * - `providers`: Collaborator traits and mock implementations
 * - `language_utils`: Language hints and raw-character detection
 * - `errors`: Custom error types for the application
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod automation;
pub mod errors;
pub mod language_utils;
pub mod providers;
pub mod quota;
pub mod translation;
pub mod validation;

// Re-export main types for easier usage
pub use app_config::{Config, Tier};
pub use automation::{AutomationOrchestrator, AutomationState};
pub use errors::{AppError, AutomationError, ProviderError, SchedulerError};
pub use quota::{ModelDescriptor, QuotaLedger};
pub use translation::{ItemStatus, SessionReport, TranslationScheduler, WorkItem};
pub use validation::IntegrityValidator;
