/*!
 * Error types for the chapterflow scheduler.
 *
 * This module contains custom error types for the collaborator seam, the
 * scheduler, and the automation pipeline, using the thiserror crate for
 * ergonomic error definitions.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::translation::item::ItemStatus;

/// Phrases that mean a remote endpoint has run out of quota for the day.
static QUOTA_EXHAUSTION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(quota|resource[_ ]exhausted|\b429\b|daily limit|exceeded your current|requests per day)",
    )
    .expect("quota regex is valid")
});

/// Returns true when an error message matches quota-exhaustion vocabulary.
///
/// Such errors are terminal for a whole translation session.
pub fn is_quota_exhaustion(message: &str) -> bool {
    QUOTA_EXHAUSTION_REGEX.is_match(message)
}

/// Errors that can occur when calling the translation or repair collaborators
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// The endpoint's quota is exhausted
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The response could not be mapped back onto the request
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether this error must halt the whole session rather than fail a batch.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            ProviderError::QuotaExhausted(_) => true,
            other => is_quota_exhaustion(&other.to_string()),
        }
    }
}

/// Errors raised by the translation scheduler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// No item with the given id is loaded
    #[error("Unknown item: {0}")]
    UnknownItem(String),

    /// A status change that the item state machine does not allow
    #[error("Invalid transition for item {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ItemStatus,
        to: ItemStatus,
    },

    /// Every candidate model is disabled or depleted
    #[error("No usable model in the candidate pool")]
    EmptyModelPool,

    /// Repair was requested but nothing qualifies
    #[error("Nothing to repair: {0}")]
    NothingToRepair(String),

    /// The scheduler already has work in progress
    #[error("A session is already running")]
    AlreadyRunning,
}

/// Errors raised by the automation orchestrator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    /// Automation is already running
    #[error("Automation is already running")]
    AlreadyRunning,

    /// Automation is not running
    #[error("Automation is not running")]
    NotRunning,

    /// Continue was requested while no review step is open
    #[error("Automation is not waiting for a review (current step: {0:?})")]
    NotAwaitingReview(Option<u8>),
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from a collaborator
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from the scheduler
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Error from the automation pipeline
    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
