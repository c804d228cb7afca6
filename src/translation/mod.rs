/*!
 * Translation session machinery.
 *
 * This module drives a collection of work items through translation and
 * repair. It is split into several submodules:
 *
 * - `item`: work item and its status state machine
 * - `concurrency`: scheduling profiles per tier and content class
 * - `batch`: greedy batch assembly under an item target and character budget
 * - `context`: rolling context carried between batches
 * - `formatting`: baseline post-formatting of translated text
 * - `repair`: repair entry collection and position-stable line merging
 * - `scheduler`: the session scheduler
 */

// Re-export main types for easier usage
pub use self::batch::{Batch, BatchAssembler};
pub use self::concurrency::{ProfileMode, ProfileTable, SchedulingProfile};
pub use self::context::RollingContext;
pub use self::formatting::TextFormatter;
pub use self::item::{ItemStatus, WorkItem};
pub use self::repair::RepairOutcome;
pub use self::scheduler::{
    SchedulerSettings, SchedulerStatus, SessionOutcome, SessionReport, TranslationScheduler,
};

// Submodules
pub mod batch;
pub mod concurrency;
pub mod context;
pub mod formatting;
pub mod item;
pub mod repair;
pub mod scheduler;
