/*!
 * Tests for batch assembly under scheduling profiles
 */

use std::collections::{HashMap, VecDeque};

use chapterflow::app_config::{Tier, TierTable};
use chapterflow::language_utils::ContentClass;
use chapterflow::translation::{BatchAssembler, ProfileMode, ProfileTable};

fn sizes(entries: &[(&str, usize)]) -> HashMap<String, usize> {
    entries.iter().map(|(id, chars)| (id.to_string(), *chars)).collect()
}

#[test]
fn test_assemble_shouldSkipItemThatDoesNotFitAndKeepOrder() {
    let sizes = sizes(&[("a", 600), ("b", 600), ("c", 300), ("d", 100)]);
    let assembler = BatchAssembler::new(5, 1000);
    let mut queue: VecDeque<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();

    let batch = assembler.assemble(&mut queue, |id| sizes.get(id).copied()).unwrap();

    assert_eq!(batch.item_ids, vec!["a", "c", "d"]);
    assert_eq!(batch.total_chars, 1000);
    assert_eq!(queue, VecDeque::from(vec!["b".to_string()]));
}

#[test]
fn test_plan_withTierProfiles_shouldNeverBreakLimits() {
    let table = ProfileTable::from_tiers(&TierTable::default());
    let chapters: Vec<(String, usize)> = (0..40)
        .map(|i| (format!("ch{:02}", i), 2_000 + (i * 797) % 9_000))
        .collect();
    let lookup: HashMap<String, usize> = chapters.iter().cloned().collect();

    for tier in [Tier::Flash, Tier::Normal, Tier::Pro] {
        for class in [ContentClass::Simple, ContentClass::Complex] {
            let profile = table.lookup(ProfileMode::Tier(tier), class);
            let assembler = BatchAssembler::for_profile(profile);

            let batches = assembler.plan(chapters.iter().map(|(id, _)| id.clone()), |id| lookup.get(id).copied());

            let planned: usize = batches.iter().map(|b| b.len()).sum();
            assert_eq!(planned, chapters.len());
            for batch in &batches {
                assert!(batch.len() <= profile.item_target);
                assert!(batch.total_chars <= profile.char_budget);
            }
        }
    }
}

#[test]
fn test_fixProfile_shouldBeNarrowerThanNormal() {
    let table = ProfileTable::default();

    let normal = table.lookup(ProfileMode::Tier(Tier::Normal), ContentClass::Complex);
    let fix = table.lookup(ProfileMode::Fix, ContentClass::Complex);

    assert!(fix.concurrency_ceiling <= normal.concurrency_ceiling);
    assert!(fix.item_target <= normal.item_target);
}
