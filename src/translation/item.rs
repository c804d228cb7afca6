/*!
 * Work items and their status machine.
 *
 * `Idle -> Processing -> {Completed, Error}`, `Completed -> Repairing -> Completed`,
 * `Error -> Idle` on requeue, and any active state back to `Idle` on a stop.
 * Translated text exists only while `Processing`, `Completed` or `Repairing`,
 * and the raw-character count is recomputed whenever it changes.
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::SchedulerError;
use crate::language_utils::count_raw_chars;

/// Lifecycle status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Idle,
    Processing,
    Repairing,
    Completed,
    Error,
}

impl ItemStatus {
    /// Whether the status machine has an edge from `self` to `to`
    pub fn can_transition_to(self, to: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, to),
            (Idle, Processing)
                | (Processing, Completed)
                | (Processing, Error)
                | (Completed, Repairing)
                | (Repairing, Completed)
                | (Error, Idle)
                // Stop resets active items; UI requeue resets finished ones
                | (Processing, Idle)
                | (Repairing, Idle)
                | (Completed, Idle)
        )
    }

    /// Whether the scheduler currently owns the item
    pub fn is_active(self) -> bool {
        matches!(self, ItemStatus::Processing | ItemStatus::Repairing)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ItemStatus::Idle => "idle",
            ItemStatus::Processing => "processing",
            ItemStatus::Repairing => "repairing",
            ItemStatus::Completed => "completed",
            ItemStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// One translatable unit (a chapter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identity
    pub id: String,
    /// Sort order within the collection
    pub order: usize,
    /// Source text
    pub source_text: String,
    translated_content: Option<String>,
    status: ItemStatus,
    error_detail: Option<String>,
    retry_count: u32,
    original_char_count: usize,
    remaining_raw_char_count: Option<usize>,
    last_model: Option<String>,
    processing_duration: Option<Duration>,
}

impl WorkItem {
    /// Create an idle item
    pub fn new(id: impl Into<String>, order: usize, source_text: impl Into<String>) -> Self {
        let source_text = source_text.into();
        Self {
            id: id.into(),
            order,
            original_char_count: source_text.chars().count(),
            source_text,
            translated_content: None,
            status: ItemStatus::Idle,
            error_detail: None,
            retry_count: 0,
            remaining_raw_char_count: None,
            last_model: None,
            processing_duration: None,
        }
    }

    /// Create an item that already carries a finished translation
    pub fn completed(
        id: impl Into<String>,
        order: usize,
        source_text: impl Into<String>,
        translated: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        let mut item = Self::new(id, order, source_text);
        item.status = ItemStatus::Completed;
        item.last_model = model;
        item.set_translation(translated.into());
        item
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn translated_content(&self) -> Option<&str> {
        self.translated_content.as_deref()
    }

    pub fn error_detail(&self) -> Option<&str> {
        self.error_detail.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn original_char_count(&self) -> usize {
        self.original_char_count
    }

    /// Raw source-script characters left in the translation
    pub fn remaining_raw_char_count(&self) -> Option<usize> {
        self.remaining_raw_char_count
    }

    /// Raw count, treating "no translation" as zero
    pub fn raw_chars(&self) -> usize {
        self.remaining_raw_char_count.unwrap_or(0)
    }

    pub fn last_model(&self) -> Option<&str> {
        self.last_model.as_deref()
    }

    pub fn processing_duration(&self) -> Option<Duration> {
        self.processing_duration
    }

    fn transition(&mut self, to: ItemStatus) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn set_translation(&mut self, text: String) {
        self.remaining_raw_char_count = Some(count_raw_chars(&text));
        self.translated_content = Some(text);
    }

    fn clear_translation(&mut self) {
        self.translated_content = None;
        self.remaining_raw_char_count = None;
    }

    /// `Idle -> Processing`
    pub fn begin_processing(&mut self) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Processing)?;
        self.error_detail = None;
        self.processing_duration = None;
        Ok(())
    }

    /// Streamed partial text; ignored unless the item is processing
    pub fn apply_partial(&mut self, text: &str) -> bool {
        if self.status != ItemStatus::Processing {
            return false;
        }
        self.set_translation(text.to_string());
        true
    }

    /// `Processing -> Completed` with the final text
    pub fn complete(&mut self, text: String, model: &str, duration: Duration) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Completed)?;
        self.set_translation(text);
        self.error_detail = None;
        self.last_model = Some(model.to_string());
        self.processing_duration = Some(duration);
        Ok(())
    }

    /// `Processing -> Error` with a display-ready reason
    pub fn fail(&mut self, reason: impl Into<String>, duration: Duration) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Error)?;
        let reason = reason.into();
        self.error_detail = Some(if reason.trim().is_empty() {
            "Unknown translation failure".to_string()
        } else {
            reason
        });
        self.retry_count += 1;
        self.clear_translation();
        self.processing_duration = Some(duration);
        Ok(())
    }

    /// `Completed -> Repairing`
    pub fn begin_repair(&mut self) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Repairing)
    }

    /// `Repairing -> Completed`, replacing the text when a repaired one is given
    pub fn finish_repair(&mut self, repaired: Option<String>) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Completed)?;
        if let Some(text) = repaired {
            self.set_translation(text);
        }
        Ok(())
    }

    /// `Error -> Idle`, keeping the retry count
    pub fn requeue_after_error(&mut self) -> Result<(), SchedulerError> {
        self.transition(ItemStatus::Idle)?;
        self.error_detail = None;
        Ok(())
    }

    /// Back to `Idle` with cleared fields so the item is translated again
    ///
    /// Accepted from `Completed` and `Error`; a no-op on idle items.
    pub fn reset_for_retranslation(&mut self) -> Result<(), SchedulerError> {
        if self.status != ItemStatus::Idle {
            if self.status.is_active() {
                return Err(SchedulerError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status,
                    to: ItemStatus::Idle,
                });
            }
            self.transition(ItemStatus::Idle)?;
        }
        self.clear_translation();
        self.error_detail = None;
        self.last_model = None;
        self.processing_duration = None;
        Ok(())
    }

    /// Count one more escalation attempt against this item
    pub fn bump_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Force an active item back to `Idle` after a global stop
    ///
    /// Returns false when the item was not active.
    pub fn reset_after_stop(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = ItemStatus::Idle;
        self.clear_translation();
        self.last_model = None;
        true
    }

    /// Rewrite the text of a completed item in place (formatting passes)
    pub fn rewrite_completed(&mut self, text: String) -> bool {
        if self.status != ItemStatus::Completed {
            return false;
        }
        self.set_translation(text);
        true
    }
}
