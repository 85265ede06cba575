//! E2E tests for the full signal pipeline
//!
//! Capture tap -> preprocessing chain -> reference onset engine -> controller,
//! with a synthetic click track standing in for the microphone.

use bpm_listener::{ChainMode, OnsetEngineFactory, SessionConfig, SessionController, SessionStatus};
use bpm_listener_core::testing::{FakePlatform, Probe};
use std::time::Duration;

const RATE: u32 = 8000;

/// Decaying 60Hz kick-like hits at `bpm`
fn click_track(bpm: f64, seconds: f64) -> Vec<f32> {
    let total = (RATE as f64 * seconds) as usize;
    let period = (RATE as f64 * 60.0 / bpm).round() as usize;
    (0..total)
        .map(|i| {
            let t = (i % period) as f32 / RATE as f32;
            if t < 0.04 {
                0.8 * (2.0 * std::f32::consts::PI * 60.0 * t).cos() * (-t / 0.01).exp()
            } else {
                0.0
            }
        })
        .collect()
}

async fn detect(mode: ChainMode, bpm: f64) -> (SessionStatus, Option<u32>) {
    let probe = Probe::new();
    let platform = FakePlatform::new(probe.clone()).with_sample_rate(RATE);
    let feeder = platform.feeder();
    let config = SessionConfig {
        preprocessing: mode,
        ..SessionConfig::default()
    };
    let mut controller = SessionController::new(platform, OnsetEngineFactory::new(), config);

    controller.start().await;
    assert!(controller.state().is_listening());
    for chunk in click_track(bpm, 8.0).chunks(512) {
        assert!(feeder.feed(chunk));
    }

    while controller.state().is_listening() {
        tokio::time::timeout(Duration::from_secs(10), controller.process_next())
            .await
            .expect("engine produced no events");
    }

    let state = controller.state();
    controller.dispose().await;
    assert_eq!(probe.counts().live_captures(), 0);
    (state.status(), state.bpm())
}

#[tokio::test]
async fn test_full_chain_detects_120_bpm() {
    let (status, bpm) = detect(ChainMode::Full, 120.0).await;
    assert_eq!(status, SessionStatus::Detected);
    let bpm = bpm.unwrap();
    assert!((119..=121).contains(&bpm), "detected {} BPM", bpm);
}

#[tokio::test]
async fn test_direct_chain_detects_96_bpm() {
    let (status, bpm) = detect(ChainMode::Direct, 96.0).await;
    assert_eq!(status, SessionStatus::Detected);
    let bpm = bpm.unwrap();
    assert!((95..=97).contains(&bpm), "detected {} BPM", bpm);
}
