/*!
 * Tests for application configuration functionality
 */

use chapterflow::app_config::{Config, LogLevel, Tier};
use chapterflow::validation::{RatioBand, RatioLimits};

use crate::common;

/// Test default configuration values
#[test]
fn test_defaultConfig_withNoParameters_shouldHaveCorrectDefaults() {
    let config = Config::default();

    assert_eq!(config.scheduler.default_tier, Tier::Normal);
    assert!(config.scheduler.smart_auto);
    assert!(config.scheduler.auto_fix);
    assert_eq!(config.scheduler.max_error_retries, 3);
    assert_eq!(config.scheduler.max_heavy_raw_retries, 2);
    assert_eq!(config.scheduler.heavy_raw_threshold, 100);
    assert_eq!(config.automation.cooldown_secs, 60);
    assert_eq!(config.validation.short_source_threshold, 200);
    assert_eq!(config.log_level, LogLevel::Info);

    // Fix profile is the forced high-quality pool
    assert_eq!(config.tiers.fix.models, vec!["gemini-2.5-pro".to_string()]);
    assert_eq!(config.tiers.fix.max_concurrency, 1);
}

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("chapterflow.json");

    let (config, created) = Config::load_or_create(&path).unwrap();

    assert!(created);
    assert!(path.exists());
    assert_eq!(config, Config::default());

    let (reloaded, created_again) = Config::load_or_create(&path).unwrap();
    assert!(!created_again);
    assert_eq!(reloaded, config);
}

#[test]
fn test_save_thenLoad_shouldKeepCustomValues() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("custom.json");
    let mut config = common::test_config();
    config.source_language = "ko".to_string();
    config.scheduler.heavy_raw_threshold = 42;
    config.tiers.pro.max_concurrency = 5;

    config.save(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.source_language, "ko");
    assert_eq!(loaded.scheduler.heavy_raw_threshold, 42);
    assert_eq!(loaded.tiers.pro.max_concurrency, 5);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_fromFile_withInvalidJson_shouldFailWithPath() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(dir.path(), "broken.json", "{ not json").unwrap();

    let error = Config::from_file(&path).unwrap_err();

    assert!(format!("{:#}", error).contains("broken.json"));
}

#[test]
fn test_validate_withInvertedRatioBand_shouldFail() {
    let mut config = Config::default();
    let mut limits = RatioLimits::default();
    limits.chinese = RatioBand::new(4.0, 1.5);
    config.validation.ratio_limits = Some(limits);

    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withZeroConcurrency_shouldFail() {
    let mut config = Config::default();
    config.tiers.flash.max_concurrency = 0;

    assert!(config.validate().is_err());
}

#[test]
fn test_enabledModels_shouldSkipDisabledOnes() {
    let mut config = Config::default();
    config.models[1].enabled = false;

    let enabled = config.enabled_models();

    assert_eq!(enabled.len(), 2);
    assert!(!enabled.contains(&config.models[1].id));
}
