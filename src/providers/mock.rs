/*!
 * Mock collaborator implementations for testing.
 *
 * This module provides scripted collaborators that simulate different behaviors:
 * - `MockTranslator::working()` - Always succeeds with a clean translation
 * - `MockTranslator::failing()` - Always fails with a transport error
 * - `MockTranslator::quota_exhausted()` - Fails with quota vocabulary
 * - `MockTranslator::sequence(..)` - Plays a list of behaviors, one per call
 * - `MockRepairer` / `MockAnalyzer` - Line repair and story analysis
 *
 * Clones share their call counters.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::ProviderError;
use crate::language_utils::is_raw_char;
use crate::providers::{
    AggregatedFixes, AggregatedRepairRequest, BatchItem, BatchRequest, BatchResponse, BatchSink,
    BatchStats, LineFix, Repairer, SingleRepairRequest, StoryAnalyzer, StoryMeta, Translator,
    WRONG_LANGUAGE_ERROR,
};

/// Syllable that stands in for one translated source-script character
const MOCK_SYLLABLE: &str = "ba";

/// Behavior mode for the mock translator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a clean translation
    Working,
    /// Always fails with a non-fatal error
    Failing,
    /// Fails with quota-exhaustion vocabulary
    QuotaExhausted,
    /// Succeeds after a delay
    Slow { delay_ms: u64 },
    /// Succeeds without any result for the items
    Empty,
    /// Returns English text flagged as wrong language
    WrongLanguage,
    /// Succeeds but leaves this many raw characters in each item
    RawLeaving { raw_chars: usize },
    /// Fails every Nth request
    Intermittent { fail_every: usize },
}

/// Render a source text the way the working mock "translates" it
///
/// Source-script characters become a latin syllable, everything else is kept.
pub fn mock_translation(source: &str) -> String {
    let mut result = String::with_capacity(source.len() * 2);
    for c in source.chars() {
        if is_raw_char(c) {
            if !result.is_empty() && !result.ends_with([' ', '\n']) {
                result.push(' ');
            }
            result.push_str(MOCK_SYLLABLE);
        } else {
            result.push(c);
        }
    }
    result
}

/// Mock translator for testing scheduler behavior
#[derive(Debug, Clone)]
pub struct MockTranslator {
    behaviors: Vec<MockBehavior>,
    model_used: Option<String>,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<BatchRequest>>>,
}

impl MockTranslator {
    /// Create a mock translator with one behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self::sequence(vec![behavior])
    }

    /// Play `behaviors` one per call; the last one repeats
    pub fn sequence(behaviors: Vec<MockBehavior>) -> Self {
        let behaviors = if behaviors.is_empty() {
            vec![MockBehavior::Working]
        } else {
            behaviors
        };
        Self {
            behaviors,
            model_used: None,
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn quota_exhausted() -> Self {
        Self::new(MockBehavior::QuotaExhausted)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    pub fn wrong_language() -> Self {
        Self::new(MockBehavior::WrongLanguage)
    }

    pub fn raw_leaving(raw_chars: usize) -> Self {
        Self::new(MockBehavior::RawLeaving { raw_chars })
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every })
    }

    /// Report this model id instead of the first candidate
    pub fn with_model_used(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    /// Number of `translate` calls so far
    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<BatchRequest> {
        self.requests.lock().clone()
    }

    fn behavior_for(&self, call: usize) -> MockBehavior {
        let index = call.min(self.behaviors.len() - 1);
        self.behaviors[index]
    }

    fn translate_items(items: &[BatchItem], raw_chars: usize, sink: &dyn BatchSink) -> HashMap<String, String> {
        items
            .iter()
            .map(|item| {
                let mut text = mock_translation(&item.text);
                if raw_chars > 0 {
                    text.push('\n');
                    text.push_str("còn sót ");
                    text.push_str(&"字".repeat(raw_chars));
                }
                let half: String = text.chars().take(text.chars().count() / 2).collect();
                sink.on_partial(&item.id, &half);
                (item.id.clone(), text)
            })
            .collect()
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, request: BatchRequest, sink: &dyn BatchSink) -> Result<BatchResponse, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let model_used = self
            .model_used
            .clone()
            .or_else(|| request.candidate_models.first().cloned())
            .unwrap_or_default();
        sink.on_log(&format!("mock batch #{} with {} item(s)", count + 1, request.items.len()));

        let (results, error_type) = match self.behavior_for(count) {
            MockBehavior::Working => (Self::translate_items(&request.items, 0, sink), None),

            MockBehavior::Failing => {
                return Err(ProviderError::ApiError {
                    message: "Simulated provider failure".to_string(),
                    status_code: 500,
                });
            }

            MockBehavior::QuotaExhausted => {
                return Err(ProviderError::ApiError {
                    message: "RESOURCE_EXHAUSTED: You exceeded your current quota".to_string(),
                    status_code: 429,
                });
            }

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                (Self::translate_items(&request.items, 0, sink), None)
            }

            MockBehavior::Empty => (HashMap::new(), None),

            MockBehavior::WrongLanguage => {
                let results = request
                    .items
                    .iter()
                    .map(|item| {
                        let words = item.text.chars().count().max(8);
                        let english = "and the man said that he was going to the house of his father "
                            .repeat(words / 8 + 1);
                        (item.id.clone(), english)
                    })
                    .collect();
                (results, Some(WRONG_LANGUAGE_ERROR.to_string()))
            }

            MockBehavior::RawLeaving { raw_chars } => (Self::translate_items(&request.items, raw_chars, sink), None),

            MockBehavior::Intermittent { fail_every } => {
                if fail_every > 0 && count % fail_every == fail_every - 1 {
                    return Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    });
                }
                (Self::translate_items(&request.items, 0, sink), None)
            }
        };

        let chars: usize = request.items.iter().map(|item| item.text.chars().count()).sum();
        Ok(BatchResponse {
            results,
            model_used,
            error_type,
            stats: BatchStats {
                prompt_tokens: Some(chars as u64),
                completion_tokens: Some((chars * 2) as u64),
            },
        })
    }
}

/// Behavior mode for the mock repairer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockRepairBehavior {
    /// Strips source-script characters from every submitted line
    Working,
    /// Returns no fixes
    Empty,
    /// Fails with a transport error
    Failing,
    /// Works after a delay
    Slow { delay_ms: u64 },
}

/// Mock line repairer
#[derive(Debug, Clone)]
pub struct MockRepairer {
    behavior: MockRepairBehavior,
    request_count: Arc<AtomicUsize>,
    entries_seen: Arc<AtomicUsize>,
}

impl MockRepairer {
    pub fn new(behavior: MockRepairBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            entries_seen: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn working() -> Self {
        Self::new(MockRepairBehavior::Working)
    }

    pub fn empty() -> Self {
        Self::new(MockRepairBehavior::Empty)
    }

    pub fn failing() -> Self {
        Self::new(MockRepairBehavior::Failing)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockRepairBehavior::Slow { delay_ms })
    }

    /// Number of repair calls so far
    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Number of lines submitted so far
    pub fn entries_seen(&self) -> usize {
        self.entries_seen.load(Ordering::SeqCst)
    }

    /// A "fixed" line: source-script characters removed
    pub fn fix_line(line: &str) -> String {
        let cleaned: String = line.chars().filter(|c| !is_raw_char(*c)).collect();
        format!("{} (đã sửa)", cleaned.trim_end())
    }

    async fn begin(&self, lines: usize) -> Result<bool, ProviderError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.entries_seen.fetch_add(lines, Ordering::SeqCst);
        match self.behavior {
            MockRepairBehavior::Working => Ok(true),
            MockRepairBehavior::Empty => Ok(false),
            MockRepairBehavior::Failing => Err(ProviderError::ConnectionError(
                "Simulated repair failure".to_string(),
            )),
            MockRepairBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl Repairer for MockRepairer {
    async fn repair_aggregated(
        &self,
        request: AggregatedRepairRequest,
        on_log: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<AggregatedFixes, ProviderError> {
        on_log(&format!("mock repair of {} line(s)", request.entries.len()));
        if !self.begin(request.entries.len()).await? {
            return Ok(AggregatedFixes::new());
        }

        let mut fixes = AggregatedFixes::new();
        for entry in request.entries {
            fixes
                .entry(entry.item_id)
                .or_default()
                .insert(entry.line_index, Self::fix_line(&entry.original_line));
        }
        Ok(fixes)
    }

    async fn repair_single(&self, request: SingleRepairRequest) -> Result<Vec<LineFix>, ProviderError> {
        if !self.begin(request.lines.len()).await? {
            return Ok(Vec::new());
        }
        Ok(request
            .lines
            .iter()
            .map(|line| LineFix {
                index: line.index,
                text: Self::fix_line(&line.line),
            })
            .collect())
    }
}

/// Mock story analyzer
#[derive(Debug, Clone)]
pub struct MockAnalyzer {
    fail: bool,
    request_count: Arc<AtomicUsize>,
}

impl MockAnalyzer {
    pub fn working() -> Self {
        Self {
            fail: false,
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            request_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoryAnalyzer for MockAnalyzer {
    async fn analyze(&self, sample: &str, current: &StoryMeta) -> Result<StoryMeta, ProviderError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::RequestFailed("Simulated analysis failure".to_string()));
        }
        Ok(StoryMeta {
            title: Some("Mock Story".to_string()),
            genres: vec!["fantasy".to_string()],
            summary: Some(sample.chars().take(40).collect()),
            source_languages: current.source_languages.clone(),
        })
    }
}
