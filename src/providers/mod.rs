/*!
 * Collaborator contracts for remote model services.
 *
 * The scheduler and the repair pipeline never talk to a model API directly.
 * They depend on these traits, implemented elsewhere:
 * - `Translator`: translates a batch of items, optionally streaming partial text
 * - `Repairer`: fixes individual lines that still contain source script
 * - `StoryAnalyzer`: extracts story metadata for the automation pipeline
 *
 * `mock` provides scripted implementations for tests.
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

use crate::errors::ProviderError;
use crate::translation::concurrency::ProfileMode;

pub mod mock;

/// `BatchResponse::error_type` value for output written in the wrong language
pub const WRONG_LANGUAGE_ERROR: &str = "wrong_language";

/// Story metadata shared by every request of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryMeta {
    pub title: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub summary: Option<String>,
    /// Declared source languages
    #[serde(default)]
    pub source_languages: Vec<String>,
}

impl StoryMeta {
    /// Whether title and genre metadata are already present
    pub fn has_metadata(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty()) && !self.genres.is_empty()
    }
}

/// Session-wide prompt material passed through to collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    /// System prompt or custom translation rules
    pub prompt: String,
    /// Name/term dictionary
    pub dictionary: String,
    /// Human-reviewed context notes
    pub context_notes: String,
    pub story: StoryMeta,
}

/// One item inside a batch request
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub id: String,
    pub text: String,
}

/// A batch translation request
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub context: PromptContext,
    /// Reserved model first, then the remaining viable pool
    pub candidate_models: Vec<String>,
    /// Tail of the latest completed translation
    pub rolling_context: Option<String>,
    pub tier: ProfileMode,
    /// Every enabled model id
    pub enabled_models: Vec<String>,
}

/// Usage statistics reported with a batch result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

/// Result of a batch translation
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    /// Final text per item id
    pub results: HashMap<String, String>,
    pub model_used: String,
    /// Non-fatal classification of the whole response, e.g. `WRONG_LANGUAGE_ERROR`
    pub error_type: Option<String>,
    pub stats: BatchStats,
}

/// Receives streamed output while a batch runs
pub trait BatchSink: Send + Sync {
    /// Partial text for one item
    fn on_partial(&self, item_id: &str, text: &str);

    /// Progress or diagnostic line from the collaborator
    fn on_log(&self, message: &str);
}

/// Batch translation collaborator
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Translate a batch of items
    ///
    /// # Arguments
    /// * `request` - Items plus all prompt material
    /// * `sink` - Receiver for partial text and log lines
    async fn translate(
        &self,
        request: BatchRequest,
        sink: &dyn BatchSink,
    ) -> Result<BatchResponse, ProviderError>;
}

/// One line that still contains source script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairEntry {
    pub item_id: String,
    pub line_index: usize,
    pub original_line: String,
}

/// Aggregated repair request across many items
#[derive(Debug, Clone)]
pub struct AggregatedRepairRequest {
    pub entries: Vec<RepairEntry>,
    pub context: PromptContext,
    pub tier: ProfileMode,
}

/// Fixes per item id, each a map of line index to replacement text
pub type AggregatedFixes = HashMap<String, HashMap<usize, String>>;

/// A bad line with its neighbours, for single-item repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineContext {
    pub index: usize,
    pub line: String,
    pub previous: Option<String>,
    pub next: Option<String>,
}

/// Single-item repair request
#[derive(Debug, Clone)]
pub struct SingleRepairRequest {
    pub item_id: String,
    pub lines: Vec<LineContext>,
    pub context: PromptContext,
    pub tier: ProfileMode,
}

/// Replacement text for one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFix {
    pub index: usize,
    pub text: String,
}

/// Line repair collaborator
#[async_trait]
pub trait Repairer: Send + Sync + Debug {
    /// Fix lines across many items in one request
    async fn repair_aggregated(
        &self,
        request: AggregatedRepairRequest,
        on_log: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<AggregatedFixes, ProviderError>;

    /// Fix lines of one item
    async fn repair_single(&self, request: SingleRepairRequest) -> Result<Vec<LineFix>, ProviderError>;
}

/// Story analysis collaborator (automation step 1)
#[async_trait]
pub trait StoryAnalyzer: Send + Sync + Debug {
    /// Derive metadata from a sample of the source text
    async fn analyze(&self, sample: &str, current: &StoryMeta) -> Result<StoryMeta, ProviderError>;
}
