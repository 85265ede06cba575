//! BPM Listener - live microphone tempo detection
//!
//! This library re-exports the session controller, preprocessing chain,
//! and tempo engine from `bpm-listener-core`.

pub use bpm_listener_core::audio;
pub use bpm_listener_core::config;
pub use bpm_listener_core::detection;
pub use bpm_listener_core::error;
pub use bpm_listener_core::session;

pub use bpm_listener_core::{
    ChainMode, CpalPlatform, LevelMonitor, LevelReading, OnsetEngineFactory, SessionConfig,
    SessionController, SessionHandle, SessionState, SessionStatus, TempoCandidate,
};
pub use bpm_listener_core::{BUILD_DATE, VERSION};
