/*!
 * Tests for integrity validation and the wrong-language guard
 */

use chapterflow::providers::mock::mock_translation;
use chapterflow::validation::{
    EnglishStopwordGuard, IntegrityConfig, IntegrityIssue, IntegrityValidator, LanguageGuard, validate,
};

use crate::common;

#[test]
fn test_validate_withMockTranslationOfLongChinese_shouldPass() {
    let source = common::chinese_source(400);
    let translated = mock_translation(&source);

    let report = IntegrityValidator::new().validate(&source, &translated, "zh");

    assert!(report.valid, "ratio {:.2} rejected", report.ratio);
    assert!(report.issue.is_none());
}

#[test]
fn test_validate_withTruncatedChinese_shouldReportTooShort() {
    let source = common::chinese_source(400);
    let translated: String = mock_translation(&source).chars().take(300).collect();

    let report = validate(&source, &translated, None, "Chinese");

    assert!(!report.valid);
    assert!(matches!(report.issue, Some(IntegrityIssue::TooShort { .. })));
    assert!(report.reason().unwrap().contains("Too short"));
}

#[test]
fn test_validate_withLowerShortThreshold_shouldApplyBands() {
    let source = common::chinese_source(50);
    let translated: String = mock_translation(&source).chars().take(40).collect();
    let lenient = IntegrityValidator::new();
    let strict = IntegrityValidator::with_config(IntegrityConfig {
        short_source_threshold: 10,
        ..IntegrityConfig::default()
    });

    assert!(lenient.validate(&source, &translated, "Chinese").valid);
    assert!(!strict.validate(&source, &translated, "Chinese").valid);
}

#[test]
fn test_validate_withKoreanCode_shouldUseKrjpBand() {
    let source = "가".repeat(300);
    // Ratio 1.3: inside the Korean/Japanese band, below the Chinese one
    let translated = "a".repeat(390);

    assert!(validate(&source, &translated, None, "ko").valid);
    assert!(!validate(&source, &translated, None, "zh").valid);
}

#[test]
fn test_englishGuard_withMockTranslation_shouldNotFlag() {
    let guard = EnglishStopwordGuard::default();
    let translated = mock_translation(&common::chinese_source(200));

    assert!(!guard.looks_like_wrong_language(&translated));
}
