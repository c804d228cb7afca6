/*!
 * Integration tests for the repair pipeline.
 *
 * Covers the aggregated repair started by the completion policy or by
 * hand, and the per-item repair path.
 */

use futures::future::join_all;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::assert_ok;

use chapterflow::app_config::Tier;
use chapterflow::errors::SchedulerError;
use chapterflow::providers::mock::{MockRepairer, MockTranslator, mock_translation};
use chapterflow::quota::ModelDescriptor;
use chapterflow::translation::{
    ItemStatus, RepairOutcome, SchedulerSettings, SessionOutcome, SessionReport, WorkItem,
};

use crate::common;

async fn next_report(reports: &mut broadcast::Receiver<SessionReport>) -> SessionReport {
    common::within(5, reports.recv()).await.expect("report channel open")
}

fn line(item: &WorkItem, index: usize) -> String {
    item.translated_content()
        .and_then(|text| text.lines().nth(index))
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_residualRawLines_shouldTriggerOneAggregatedRepair() {
    common::init_test_logging();
    let translator = MockTranslator::raw_leaving(3);
    let repairer = MockRepairer::working();
    let (scheduler, _ledger) = common::scheduler_with(translator.clone(), repairer.clone());
    scheduler
        .load_items(vec![WorkItem::new("long", 0, common::chinese_source(300))])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    scheduler.start(Tier::Normal, None).unwrap();
    let report = next_report(&mut reports).await;

    assert_eq!(report.outcome, SessionOutcome::Clean);
    assert_eq!(translator.call_count(), 1);
    assert_eq!(repairer.call_count(), 1);
    assert_eq!(repairer.entries_seen(), 1);

    let item = scheduler.item("long").unwrap();
    assert_eq!(item.status(), ItemStatus::Completed);
    assert_eq!(item.raw_chars(), 0);
    assert_eq!(line(&item, 0), mock_translation(&item.source_text));
    assert_eq!(line(&item, 1), "còn sót (đã sửa)");
}

#[tokio::test]
async fn test_heavyRawAtRetryCeiling_shouldFallBackToRepair() {
    common::init_test_logging();
    let translator = MockTranslator::raw_leaving(150);
    let repairer = MockRepairer::working();
    let (scheduler, _ledger) = common::scheduler_with(translator.clone(), repairer.clone());
    scheduler.configure(SchedulerSettings {
        max_heavy_raw_retries: 0,
        ..scheduler.settings()
    });
    scheduler
        .load_items(vec![WorkItem::new("long", 0, common::chinese_source(300))])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    scheduler.start(Tier::Normal, None).unwrap();
    let report = next_report(&mut reports).await;

    assert_eq!(report.outcome, SessionOutcome::Clean);
    assert_eq!(translator.call_count(), 1);
    assert_eq!(repairer.call_count(), 1);
    assert_eq!(scheduler.item("long").unwrap().raw_chars(), 0);
}

#[tokio::test]
async fn test_repairReturningNothing_shouldRunOnceAndReportIssues() {
    common::init_test_logging();
    let repairer = MockRepairer::empty();
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::raw_leaving(3), repairer.clone());
    scheduler
        .load_items(vec![WorkItem::new("long", 0, common::chinese_source(300))])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    scheduler.start(Tier::Normal, None).unwrap();
    let report = next_report(&mut reports).await;

    assert_eq!(report.outcome, SessionOutcome::WithIssues);
    assert_eq!(report.raw_items, 1);
    assert_eq!(repairer.call_count(), 1);
    let item = scheduler.item("long").unwrap();
    assert_eq!(item.status(), ItemStatus::Completed);
    assert_eq!(item.raw_chars(), 3);
}

#[tokio::test]
async fn test_failingRepair_shouldRestoreItemsWithoutHalting() {
    common::init_test_logging();
    let (scheduler, ledger) = common::scheduler_with(MockTranslator::raw_leaving(3), MockRepairer::failing());
    scheduler
        .load_items(vec![WorkItem::new("long", 0, common::chinese_source(300))])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    scheduler.start(Tier::Normal, None).unwrap();
    let report = next_report(&mut reports).await;

    assert_eq!(report.outcome, SessionOutcome::WithIssues);
    assert_eq!(scheduler.item("long").unwrap().status(), ItemStatus::Completed);
    assert!(!ledger.is_depleted("m-best"));
}

#[tokio::test]
async fn test_startRepair_shouldPatchOnlyBadLinesInPlace() {
    common::init_test_logging();
    let repairer = MockRepairer::working();
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![
            WorkItem::completed("a", 0, "源文", "dòng một\ndòng 字 hai\ndòng ba 字", None),
            WorkItem::completed("b", 1, "源文", "sạch sẽ", None),
        ])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    let lines = assert_ok!(scheduler.start_repair());
    assert_eq!(lines, 2);
    assert_eq!(scheduler.item("a").unwrap().status(), ItemStatus::Repairing);
    assert_eq!(scheduler.item("b").unwrap().status(), ItemStatus::Completed);

    let report = next_report(&mut reports).await;
    assert_eq!(report.outcome, SessionOutcome::Clean);

    let item = scheduler.item("a").unwrap();
    assert_eq!(line(&item, 0), "dòng một");
    assert_eq!(line(&item, 1), "dòng hai (đã sửa)");
    assert_eq!(line(&item, 2), "dòng ba (đã sửa)");
    assert_eq!(repairer.entries_seen(), 2);
}

#[tokio::test]
async fn test_startRepair_withCleanItems_shouldReportNothingToRepair() {
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), MockRepairer::working());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "sạch sẽ", None)])
        .unwrap();

    let result = scheduler.start_repair();

    assert!(matches!(result, Err(SchedulerError::NothingToRepair(_))));
    assert!(!scheduler.status().active);
}

#[tokio::test]
async fn test_repairItem_withLightResidue_shouldPatchLines() {
    common::init_test_logging();
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), MockRepairer::working());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "câu đầu\ncâu 字 sau", None)])
        .unwrap();

    let outcome = scheduler.repair_item("a").await.unwrap();

    assert_eq!(
        outcome,
        RepairOutcome::Repaired {
            items: 1,
            raw_before: 1,
            raw_after: 0
        }
    );
    let item = scheduler.item("a").unwrap();
    assert_eq!(item.status(), ItemStatus::Completed);
    assert_eq!(item.translated_content(), Some("câu đầu\ncâu sau (đã sửa)"));
}

#[tokio::test]
async fn test_repairItem_withHeavyResidue_shouldRetranslateAtFixTier() {
    common::init_test_logging();
    let translator = MockTranslator::working();
    let (scheduler, _ledger) = common::scheduler_with(translator.clone(), MockRepairer::working());
    let heavy = format!("bản dịch\n{}", "字".repeat(150));
    scheduler
        .load_items(vec![WorkItem::completed("h", 0, "他说道", heavy, None)])
        .unwrap();
    let mut reports = scheduler.subscribe_reports();

    let outcome = scheduler.repair_item("h").await.unwrap();
    assert_eq!(outcome, RepairOutcome::Requeued("h".to_string()));
    let report = next_report(&mut reports).await;

    assert_eq!(report.outcome, SessionOutcome::Clean);
    let item = scheduler.item("h").unwrap();
    assert_eq!(item.translated_content(), Some(mock_translation("他说道").as_str()));
    assert_eq!(item.last_model(), Some("m-best"));
    assert_eq!(item.retry_count(), 1);
}

#[tokio::test]
async fn test_repairItem_withEmptyFixes_shouldReportNotFixable() {
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), MockRepairer::empty());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "câu 字", None)])
        .unwrap();

    let outcome = scheduler.repair_item("a").await.unwrap();

    assert_eq!(outcome, RepairOutcome::NotFixable("a".to_string()));
    assert_eq!(scheduler.item("a").unwrap().translated_content(), Some("câu 字"));
}

#[tokio::test]
async fn test_repairItem_onCleanOrIdleItems_shouldNotSubmit() {
    let repairer = MockRepairer::working();
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![
            WorkItem::completed("clean", 0, "源文", "sạch", None),
            WorkItem::new("idle", 1, "源文"),
        ])
        .unwrap();

    assert_eq!(scheduler.repair_item("clean").await, Ok(RepairOutcome::NothingToRepair));
    assert!(matches!(
        scheduler.repair_item("idle").await,
        Err(SchedulerError::InvalidTransition { .. })
    ));
    assert!(matches!(
        scheduler.repair_item("ghost").await,
        Err(SchedulerError::UnknownItem(_))
    ));
    assert_eq!(repairer.call_count(), 0);
}

#[tokio::test]
async fn test_repairItem_concurrently_shouldRepairEachItem() {
    common::init_test_logging();
    let repairer = MockRepairer::slow(50);
    let (scheduler, _ledger) = common::scheduler_with(MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![
            WorkItem::completed("a", 0, "源文", "một 字", None),
            WorkItem::completed("b", 1, "源文", "hai 字", None),
        ])
        .unwrap();

    let outcomes = join_all([scheduler.repair_item("a"), scheduler.repair_item("b")]).await;

    for outcome in outcomes {
        assert!(matches!(outcome, Ok(RepairOutcome::Repaired { raw_after: 0, .. })));
    }
    assert_eq!(repairer.call_count(), 2);
    assert_eq!(scheduler.item("b").unwrap().translated_content(), Some("hai (đã sửa)"));
}

#[tokio::test]
async fn test_startRepair_withDepletedFixPool_shouldRefuseWithoutSubmitting() {
    let repairer = MockRepairer::working();
    let (scheduler, ledger) = common::scheduler_with(MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "dòng 字", None)])
        .unwrap();
    ledger.mark_depleted("m-best");

    let result = scheduler.start_repair();

    assert_eq!(result, Err(SchedulerError::EmptyModelPool));
    assert_eq!(repairer.call_count(), 0);
    assert_eq!(scheduler.item("a").unwrap().status(), ItemStatus::Completed);
    assert!(!scheduler.status().active);
    assert!(!scheduler.status().repairing);
}

#[tokio::test]
async fn test_repairItem_withDepletedFixPool_shouldRefuseWithoutSubmitting() {
    let repairer = MockRepairer::working();
    let (scheduler, ledger) = common::scheduler_with(MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "câu 字", None)])
        .unwrap();
    ledger.mark_depleted("m-best");

    let outcome = scheduler.repair_item("a").await;

    assert_eq!(outcome, Err(SchedulerError::EmptyModelPool));
    assert_eq!(repairer.call_count(), 0);
    let item = scheduler.item("a").unwrap();
    assert_eq!(item.status(), ItemStatus::Completed);
    assert_eq!(item.translated_content(), Some("câu 字"));
}

#[tokio::test]
async fn test_startRepair_withFixPoolAtRpmLimit_shouldWaitForHeadroom() {
    common::init_test_logging();
    let mut config = common::test_config();
    config.models = vec![
        ModelDescriptor::new("m-fast", 0, 0, 1),
        ModelDescriptor::new("m-best", 1, 0, 0),
    ];
    let repairer = MockRepairer::working();
    let (scheduler, ledger) = common::scheduler_from(&config, MockTranslator::working(), repairer.clone());
    scheduler
        .load_items(vec![WorkItem::completed("a", 0, "源文", "dòng 字", None)])
        .unwrap();
    assert_eq!(ledger.try_reserve(&["m-best".to_string()]), Some("m-best".to_string()));

    assert_eq!(scheduler.start_repair(), Ok(1));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(repairer.call_count(), 0);
    assert_eq!(scheduler.item("a").unwrap().status(), ItemStatus::Repairing);
    assert_eq!(ledger.usage("m-best").unwrap().recent_requests.len(), 1);

    assert!(scheduler.stop());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(scheduler.item("a").unwrap().status(), ItemStatus::Idle);
    assert_eq!(repairer.call_count(), 0);
}
