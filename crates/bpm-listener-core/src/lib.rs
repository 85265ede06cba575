//! BPM Listener Core - Session controller, preprocessing chain, and tempo engine seam
//!
//! Listens to a live microphone, runs the signal through a kick-emphasising
//! preprocessing chain into a tempo engine, and reports one confident BPM
//! per session. Every acquired resource is released on every exit path.

pub mod audio;
pub mod config;
pub mod detection;
pub mod error;
pub mod session;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use audio::{ChainMode, CpalPlatform, LevelMonitor, LevelReading};
pub use config::SessionConfig;
pub use detection::{OnsetEngineFactory, TempoCandidate};
pub use error::{AcquisitionError, StartError};
pub use session::{SessionController, SessionHandle, SessionState, SessionStatus};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");
