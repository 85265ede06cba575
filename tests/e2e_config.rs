//! E2E tests for configuration files and their effect on a session

use bpm_listener::{ChainMode, SessionConfig, SessionController};
use bpm_listener_core::testing::{FakeEngineFactory, FakePlatform, Probe};
use std::time::Duration;

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bpm-listener").join("config.json");

    let mut config = SessionConfig::default();
    config.detection_timeout_ms = 20_000;
    config.preprocessing = ChainMode::Direct;
    config.engine.stabilization_time_ms = 3000;
    config.save(&path).unwrap();

    let loaded = SessionConfig::load(&path);
    assert_eq!(loaded, config);
    assert_eq!(loaded.detection_timeout(), Duration::from_secs(20));
}

#[test]
fn test_config_json_contract() {
    let json = serde_json::to_value(SessionConfig::default()).unwrap();
    assert_eq!(json["detection_timeout_ms"], 15000);
    assert_eq!(json["confidence_threshold"], 5);
    assert_eq!(json["preprocessing"], "full");
    assert_eq!(json["engine"]["continuous_analysis"], true);
    assert_eq!(json["engine"]["stabilization_time_ms"], 5000);
    assert!(json["device"].is_null());
}

#[test]
fn test_partial_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"detection_timeout_ms": 500, "device": "USB Mic"}"#).unwrap();

    let config = SessionConfig::load(&path);
    assert_eq!(config.detection_timeout_ms, 500);
    assert_eq!(config.device.as_deref(), Some("USB Mic"));
    assert_eq!(config.confidence_threshold, 5);
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_applies() {
    let probe = Probe::new();
    let factory = FakeEngineFactory::new(probe.clone());
    let config = SessionConfig {
        detection_timeout_ms: 500,
        ..SessionConfig::default()
    };
    let mut controller = SessionController::new(FakePlatform::new(probe.clone()), factory, config);

    controller.start().await;
    tokio::time::sleep(Duration::from_millis(499)).await;
    controller.process_pending().await;
    assert!(controller.state().is_listening());

    controller.process_next().await;
    assert!(controller.state().error().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_engine_options_reach_factory() {
    let probe = Probe::new();
    let mut config = SessionConfig::default();
    config.engine.continuous_analysis = false;
    let mut controller = SessionController::new(
        FakePlatform::new(probe.clone()),
        FakeEngineFactory::new(probe.clone()),
        config.clone(),
    );

    controller.start().await;
    assert_eq!(controller.config().engine, config.engine);
    assert_eq!(probe.counts().engines_created, 1);
}
