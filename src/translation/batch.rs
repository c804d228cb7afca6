/*!
 * Batch assembly.
 *
 * Pulls queued items into batches bounded by an item-count target and a
 * total character budget. Items that do not fit stay in the queue, in order,
 * for a later batch.
 */

use std::collections::VecDeque;

use super::concurrency::SchedulingProfile;

/// One assembled batch of item ids
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    /// Item ids, in queue order
    pub item_ids: Vec<String>,
    /// Sum of source characters over the batch
    pub total_chars: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Greedy batch assembler for one scheduling profile
#[derive(Debug, Clone, Copy)]
pub struct BatchAssembler {
    item_target: usize,
    char_budget: usize,
}

impl BatchAssembler {
    /// Create an assembler with explicit limits
    pub fn new(item_target: usize, char_budget: usize) -> Self {
        Self {
            item_target: item_target.max(1),
            char_budget: char_budget.max(1),
        }
    }

    /// Create an assembler from a resolved profile
    pub fn for_profile(profile: &SchedulingProfile) -> Self {
        Self::new(profile.item_target, profile.char_budget)
    }

    pub fn item_target(&self) -> usize {
        self.item_target
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Take the next batch off the front of `queue`
    ///
    /// `char_count` returns the source length of an id, or `None` for ids
    /// that are no longer schedulable (those are dropped from the queue).
    /// Items that would overflow the remaining budget are skipped and stay
    /// queued. An item larger than the whole budget is sent on its own when
    /// it reaches the front of an empty batch, so it can never stall the queue.
    pub fn assemble<F>(&self, queue: &mut VecDeque<String>, char_count: F) -> Option<Batch>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let mut batch = Batch::default();
        let mut left_behind = VecDeque::with_capacity(queue.len());

        while let Some(id) = queue.pop_front() {
            if batch.len() >= self.item_target {
                left_behind.push_back(id);
                break;
            }

            let Some(chars) = char_count(&id) else {
                continue;
            };

            let fits = batch.total_chars + chars <= self.char_budget;
            if fits || batch.is_empty() {
                batch.total_chars += chars;
                batch.item_ids.push(id);
                if !fits {
                    // Oversized item travels alone
                    break;
                }
            } else {
                left_behind.push_back(id);
            }
        }

        // Restore skipped items ahead of the untouched tail
        left_behind.append(queue);
        *queue = left_behind;

        if batch.is_empty() { None } else { Some(batch) }
    }

    /// Split a whole queue into batches, for dry-run planning
    pub fn plan<F>(&self, ids: impl IntoIterator<Item = String>, char_count: F) -> Vec<Batch>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let mut queue: VecDeque<String> = ids.into_iter().collect();
        let mut batches = Vec::new();
        while let Some(batch) = self.assemble(&mut queue, &char_count) {
            batches.push(batch);
        }
        batches
    }
}
