/*!
 * Rolling continuity context.
 *
 * Holds the tail of the most recently completed item's translation so the
 * next batch request can continue the story. Updates only move forward by
 * item order: a batch that finishes late cannot overwrite context recorded
 * from a later item.
 */

use serde::{Deserialize, Serialize};

/// Trailing slice of the latest translated item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingContext {
    max_chars: usize,
    last_order: Option<usize>,
    text: String,
}

impl RollingContext {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            last_order: None,
            text: String::new(),
        }
    }

    /// Record the translation of the item with sort order `order`
    ///
    /// Returns false, leaving the context untouched, when `order` is behind
    /// the already recorded one.
    pub fn advance(&mut self, order: usize, translated: &str) -> bool {
        if self.last_order.is_some_and(|last| order < last) {
            return false;
        }
        self.last_order = Some(order);
        self.text = tail_chars(translated.trim_end(), self.max_chars);
        true
    }

    /// Context text for the next request, if any
    pub fn text(&self) -> Option<&str> {
        if self.text.is_empty() { None } else { Some(&self.text) }
    }

    pub fn last_order(&self) -> Option<usize> {
        self.last_order
    }

    pub fn clear(&mut self) {
        self.last_order = None;
        self.text.clear();
    }

    pub fn set_max_chars(&mut self, max_chars: usize) {
        self.max_chars = max_chars;
    }
}

/// Last `max_chars` characters of `text`, on a char boundary
fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}
