/*!
 * Integration tests for the automation pipeline.
 *
 * Runs the orchestrator over a real scheduler with mock collaborators.
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use chapterflow::app_config::{Config, Tier};
use chapterflow::automation::{AutomationOrchestrator, AutomationOutcome, AutomationState};
use chapterflow::errors::AutomationError;
use chapterflow::providers::mock::{MockAnalyzer, MockRepairer, MockTranslator};
use chapterflow::providers::{PromptContext, StoryMeta};
use chapterflow::translation::{ItemStatus, TranslationScheduler};

use crate::common;

struct Harness {
    scheduler: TranslationScheduler,
    orchestrator: AutomationOrchestrator,
    translator: MockTranslator,
    analyzer: MockAnalyzer,
}

fn harness(config: &Config, translator: MockTranslator, analyzer: MockAnalyzer, items: usize) -> Harness {
    common::init_test_logging();
    let (scheduler, _ledger) = common::scheduler_from(config, translator.clone(), MockRepairer::working());
    scheduler.load_items(common::short_items(items)).unwrap();
    let orchestrator = AutomationOrchestrator::new(scheduler.clone(), Arc::new(analyzer.clone()), &config.automation);
    Harness {
        scheduler,
        orchestrator,
        translator,
        analyzer,
    }
}

async fn wait_for_state<P>(orchestrator: &AutomationOrchestrator, predicate: P) -> AutomationState
where
    P: FnMut(&AutomationState) -> bool,
{
    let mut state = orchestrator.subscribe();
    common::within(5, async move {
        state
            .wait_for(predicate)
            .await
            .map(|s| s.clone())
            .expect("state channel open")
    })
    .await
}

#[tokio::test]
async fn test_fullRun_shouldPauseAtReviewsAndComplete() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::working(), 3);

    let steps = h.orchestrator.start(&[1, 2, 3, 4, 5, 6], Tier::Normal).unwrap();
    assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);

    let review = wait_for_state(&h.orchestrator, |s| s.awaiting_review && s.current_step == Some(2)).await;
    assert_eq!(review.pending_steps, vec![3, 4, 5, 6]);
    assert_eq!(h.analyzer.call_count(), 1);
    assert_eq!(h.scheduler.prompt_context().story.title.as_deref(), Some("Mock Story"));
    h.orchestrator.continue_review().unwrap();

    // Analysis produced genres, so prompt tuning waits for review too
    wait_for_state(&h.orchestrator, |s| s.awaiting_review && s.current_step == Some(3)).await;
    h.orchestrator.continue_review().unwrap();

    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;
    assert_eq!(finished.outcome, Some(AutomationOutcome::Completed));
    assert!(!finished.running);
    assert!(h
        .scheduler
        .items()
        .iter()
        .all(|item| item.status() == ItemStatus::Completed));
    assert_eq!(h.orchestrator.continue_review(), Err(AutomationError::NotRunning));
}

#[tokio::test]
async fn test_start_withAllPreconditionsMet_shouldFallBackToBackgroundSteps() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::working(), 2);
    h.scheduler.set_prompt_context(PromptContext {
        prompt: "Giữ nguyên tên riêng".to_string(),
        dictionary: String::new(),
        context_notes: "Nhân vật chính là Lâm Phong".to_string(),
        story: StoryMeta {
            title: Some("Truyện".to_string()),
            genres: vec!["tiên hiệp".to_string()],
            summary: None,
            source_languages: vec!["Chinese".to_string()],
        },
    });

    let steps = h.orchestrator.start(&[1, 2, 3], Tier::Flash).unwrap();
    assert_eq!(steps, vec![4, 5, 6]);

    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;
    assert_eq!(finished.outcome, Some(AutomationOutcome::Completed));
    assert_eq!(h.analyzer.call_count(), 0);
    assert_eq!(h.translator.call_count(), 1);
}

#[tokio::test]
async fn test_promptTuning_withoutCustomMaterial_shouldSkipReview() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::working(), 1);

    h.orchestrator.start(&[3, 4], Tier::Normal).unwrap();
    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;

    assert_eq!(finished.outcome, Some(AutomationOutcome::Completed));
    assert_eq!(h.translator.call_count(), 1);
}

#[tokio::test]
async fn test_stop_duringTranslation_shouldStopSchedulerToo() {
    let h = harness(&common::test_config(), MockTranslator::slow(1_000), MockAnalyzer::working(), 3);

    h.orchestrator.start(&[4, 5, 6], Tier::Normal).unwrap();
    wait_for_state(&h.orchestrator, |s| s.current_step == Some(4)).await;
    assert!(h.scheduler.status().active);
    assert!(matches!(
        h.orchestrator.continue_review(),
        Err(AutomationError::NotAwaitingReview(Some(4)))
    ));

    assert!(h.orchestrator.stop());
    assert!(!h.orchestrator.stop());

    let state = h.orchestrator.state();
    assert_eq!(state.outcome, Some(AutomationOutcome::Stopped));
    assert!(state.pending_steps.is_empty());
    assert!(!h.scheduler.status().active);
    assert!(h
        .scheduler
        .items()
        .iter()
        .all(|item| item.status() == ItemStatus::Idle));
}

#[tokio::test]
async fn test_analysisFailure_shouldFailRunAtStepOne() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::failing(), 1);

    h.orchestrator.start(&[1, 4], Tier::Normal).unwrap();
    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;

    match finished.outcome {
        Some(AutomationOutcome::Failed { step, reason }) => {
            assert_eq!(step, 1);
            assert!(reason.contains("Simulated analysis failure"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(h.translator.call_count(), 0);
}

#[tokio::test]
async fn test_quotaHaltDuringTranslation_shouldFailRunAtStepFour() {
    let h = harness(&common::test_config(), MockTranslator::quota_exhausted(), MockAnalyzer::working(), 2);

    h.orchestrator.start(&[4, 5, 6], Tier::Normal).unwrap();
    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;

    match finished.outcome {
        Some(AutomationOutcome::Failed { step, reason }) => {
            assert_eq!(step, 4);
            assert!(reason.contains("RESOURCE_EXHAUSTED"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cooldown_shouldCountDownBetweenBackgroundSteps() {
    let mut config = common::test_config();
    config.automation.cooldown_secs = 1;
    let h = harness(&config, MockTranslator::working(), MockAnalyzer::working(), 0);
    let started = Instant::now();

    h.orchestrator.start(&[4, 6], Tier::Normal).unwrap();
    let cooling = wait_for_state(&h.orchestrator, |s| s.countdown == Some(1)).await;
    assert_eq!(cooling.pending_steps, vec![6]);

    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;
    assert_eq!(finished.outcome, Some(AutomationOutcome::Completed));
    assert!(started.elapsed().as_millis() >= 1_000);
}

#[tokio::test]
async fn test_reviewStep_shouldNotWaitForCooldown() {
    let mut config = common::test_config();
    config.automation.cooldown_secs = 30;
    let h = harness(&config, MockTranslator::working(), MockAnalyzer::working(), 1);

    h.orchestrator.start(&[1, 2], Tier::Normal).unwrap();
    let review = wait_for_state(&h.orchestrator, |s| s.awaiting_review).await;

    assert_eq!(review.current_step, Some(2));
    assert_eq!(review.countdown, None);
    assert!(h.orchestrator.stop());
}

#[tokio::test]
async fn test_continueReview_calledTwice_shouldReleaseOnlyOnePause() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::working(), 1);
    h.scheduler.set_prompt_context(PromptContext {
        story: StoryMeta {
            genres: vec!["tiên hiệp".to_string()],
            ..StoryMeta::default()
        },
        ..PromptContext::default()
    });

    assert_eq!(h.orchestrator.start(&[2, 3, 4], Tier::Normal).unwrap(), vec![2, 3, 4]);
    wait_for_state(&h.orchestrator, |s| s.awaiting_review && s.current_step == Some(2)).await;

    assert_eq!(h.orchestrator.continue_review(), Ok(()));
    assert_eq!(
        h.orchestrator.continue_review(),
        Err(AutomationError::NotAwaitingReview(Some(2)))
    );

    // Step 3 still waits for its own confirmation
    wait_for_state(&h.orchestrator, |s| s.awaiting_review && s.current_step == Some(3)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = h.orchestrator.state();
    assert!(state.awaiting_review);
    assert_eq!(state.current_step, Some(3));
    assert_eq!(h.translator.call_count(), 0);

    h.orchestrator.continue_review().unwrap();
    let finished = common::within(5, h.orchestrator.wait_until_finished()).await;
    assert_eq!(finished.outcome, Some(AutomationOutcome::Completed));
    assert_eq!(h.translator.call_count(), 1);
}

#[tokio::test]
async fn test_restart_afterStopWithPendingContinue_shouldPauseAgain() {
    let h = harness(&common::test_config(), MockTranslator::working(), MockAnalyzer::working(), 1);

    h.orchestrator.start(&[2, 4], Tier::Normal).unwrap();
    wait_for_state(&h.orchestrator, |s| s.awaiting_review).await;
    h.orchestrator.continue_review().unwrap();
    assert!(h.orchestrator.stop());

    h.orchestrator.start(&[2, 4], Tier::Normal).unwrap();
    wait_for_state(&h.orchestrator, |s| s.awaiting_review && s.current_step == Some(2)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(h.orchestrator.state().awaiting_review);
    assert_eq!(h.translator.call_count(), 0);
    assert!(h.orchestrator.stop());
}
