/*!
 * Tests for the quota ledger on a manually driven clock
 */

use chrono::{TimeDelta, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use chapterflow::quota::{LedgerPolicy, ManualClock, ModelDescriptor, QuotaLedger};

use crate::common;

fn pool(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn ledger_at(models: Vec<ModelDescriptor>, hour: u32, minute: u32) -> (QuotaLedger, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 14, hour, minute, 0).unwrap()));
    let ledger = QuotaLedger::with_clock(models, clock.clone(), LedgerPolicy::default());
    (ledger, clock)
}

#[test]
fn test_dailyCounter_afterMidnight_shouldReset() {
    let (ledger, clock) = ledger_at(vec![ModelDescriptor::new("m", 0, 2, 0)], 23, 58);
    let models = pool(&["m"]);

    assert!(ledger.try_reserve(&models).is_some());
    ledger.record_result("m", true);
    assert!(ledger.try_reserve(&models).is_some());
    ledger.record_result("m", true);
    assert!(ledger.is_depleted("m"));
    assert!(ledger.viable_models(&models).is_empty());

    clock.advance(TimeDelta::minutes(3));

    assert!(!ledger.is_depleted("m"));
    assert_eq!(ledger.usage("m").unwrap().requests_today, 0);
    assert_eq!(ledger.try_reserve(&models), Some("m".to_string()));
}

#[test]
fn test_viableModels_shouldKeepCoolingDownButDropDepleted() {
    let (ledger, _clock) = ledger_at(
        vec![ModelDescriptor::new("a", 1, 0, 0), ModelDescriptor::new("b", 0, 0, 1)],
        10,
        0,
    );
    let models = pool(&["a", "b"]);

    // "a" is out of RPM headroom, "b" is depleted
    ledger.try_reserve(&pool(&["a"]));
    ledger.mark_depleted("b");

    assert_eq!(ledger.viable_models(&models), pool(&["a"]));
    assert_eq!(ledger.pick_best(&models), None);
    assert!(!ledger.has_available(&models));
}

#[test]
fn test_nextRelease_withCooldown_shouldWaitForCooldownEnd() {
    let (ledger, clock) = ledger_at(vec![ModelDescriptor::new("m", 0, 0, 0)], 10, 0);
    let models = pool(&["m"]);

    ledger.set_cooldown("m", TimeDelta::seconds(30));
    assert_eq!(ledger.next_release(&models), Some(Duration::from_secs(30)));

    clock.advance(TimeDelta::seconds(31));
    assert_eq!(ledger.next_release(&models), Some(Duration::ZERO));
}

#[test]
fn test_fromConfig_shouldApplyConfiguredCooldownPolicy() {
    let mut config = common::test_config();
    config.scheduler.error_cooldown_threshold = 1;
    config.scheduler.error_cooldown_secs = 5;
    let ledger = QuotaLedger::from_config(&config);
    let models = pool(&["m-fast"]);

    ledger.try_reserve(&models);
    ledger.record_result("m-fast", false);

    assert!(!ledger.has_available(&models));
    let wait = ledger.next_release(&models).unwrap();
    assert!(wait <= Duration::from_secs(5));
    assert!(wait > Duration::from_secs(3));
}

#[test]
fn test_tryReserve_fromManyThreads_shouldNeverExceedRpm() {
    let (ledger, _clock) = ledger_at(vec![ModelDescriptor::new("m", 5, 0, 0)], 10, 0);
    let ledger = Arc::new(ledger);
    let models = pool(&["m"]);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let models = models.clone();
            std::thread::spawn(move || ledger.try_reserve(&models).is_some())
        })
        .collect();
    let granted = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|granted| *granted)
        .count();

    assert_eq!(granted, 5);
    assert_eq!(ledger.usage("m").unwrap().recent_requests.len(), 5);
}
