/*!
 * Line-level repair helpers.
 *
 * Finds lines that still carry source script, builds repair entries and
 * merges fixed lines back into a text by position. The async repair flows
 * that call collaborators live in the scheduler, which owns item state.
 */

use std::collections::HashMap;

use crate::language_utils::line_has_raw;
use crate::providers::{LineContext, LineFix, RepairEntry};

use super::formatting::TextFormatter;
use super::item::{ItemStatus, WorkItem};

/// Indices of lines that still contain raw source script
pub fn bad_line_indices(text: &str) -> Vec<usize> {
    text.split('\n')
        .enumerate()
        .filter(|(_, line)| line_has_raw(line))
        .map(|(index, _)| index)
        .collect()
}

/// Repair entries for one item's translated text
pub fn repair_entries_for(item: &WorkItem) -> Vec<RepairEntry> {
    let Some(text) = item.translated_content() else {
        return Vec::new();
    };
    text.split('\n')
        .enumerate()
        .filter(|(_, line)| line_has_raw(line))
        .map(|(line_index, line)| RepairEntry {
            item_id: item.id.clone(),
            line_index,
            original_line: line.to_string(),
        })
        .collect()
}

/// Repair entries across every completed item with residual raw content
pub fn collect_repair_entries<'a>(items: impl IntoIterator<Item = &'a WorkItem>) -> Vec<RepairEntry> {
    items
        .into_iter()
        .filter(|item| item.status() == ItemStatus::Completed && item.raw_chars() > 0)
        .flat_map(repair_entries_for)
        .collect()
}

/// Replace lines by index, leaving every other line verbatim
///
/// Indices beyond the last line are ignored.
pub fn merge_line_fixes(text: &str, fixes: &HashMap<usize, String>) -> String {
    if fixes.is_empty() {
        return text.to_string();
    }
    text.split('\n')
        .enumerate()
        .map(|(index, line)| fixes.get(&index).map_or(line, String::as_str))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Merge fixes, then apply baseline formatting
pub fn apply_line_fixes(text: &str, fixes: &HashMap<usize, String>) -> String {
    TextFormatter::format(&merge_line_fixes(text, fixes))
}

/// Convert single-repair results to a merge map
pub fn fixes_to_map(fixes: Vec<LineFix>) -> HashMap<usize, String> {
    fixes.into_iter().map(|fix| (fix.index, fix.text)).collect()
}

/// Bad lines of a text with their neighbours
pub fn line_contexts(text: &str) -> Vec<LineContext> {
    let lines: Vec<&str> = text.split('\n').collect();
    bad_line_indices(text)
        .into_iter()
        .map(|index| LineContext {
            index,
            line: lines[index].to_string(),
            previous: index.checked_sub(1).map(|i| lines[i].to_string()),
            next: lines.get(index + 1).map(|line| line.to_string()),
        })
        .collect()
}

/// What a manual single-item repair should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleRepairPlan {
    /// Too much raw content for line patches; translate the item again
    Retranslate,
    /// Patch these lines
    Patch(Vec<LineContext>),
    /// No bad lines
    NothingToFix,
}

/// Decide how to repair one completed item
pub fn plan_single_repair(item: &WorkItem, heavy_raw_threshold: usize) -> SingleRepairPlan {
    if item.raw_chars() > heavy_raw_threshold {
        return SingleRepairPlan::Retranslate;
    }
    match item.translated_content().map(line_contexts) {
        Some(lines) if !lines.is_empty() => SingleRepairPlan::Patch(lines),
        _ => SingleRepairPlan::NothingToFix,
    }
}

/// Outcome of a repair request, reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Lines were patched; raw counts before and after
    Repaired { items: usize, raw_before: usize, raw_after: usize },
    /// Handed back to the scheduler for full retranslation
    Requeued(String),
    /// The collaborator returned no usable fixes
    NotFixable(String),
    /// No completed item had bad lines
    NothingToRepair,
    /// The collaborator call failed; items were returned unchanged
    Failed(String),
}

impl std::fmt::Display for RepairOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repaired { items, raw_before, raw_after } => write!(
                f,
                "Repaired {} item(s), raw characters {} -> {}",
                items, raw_before, raw_after
            ),
            Self::Requeued(id) => write!(f, "Item {} queued for full retranslation", id),
            Self::NotFixable(id) => write!(f, "Item {} could not be fixed", id),
            Self::NothingToRepair => write!(f, "Nothing to repair"),
            Self::Failed(reason) => write!(f, "Repair failed: {}", reason),
        }
    }
}
