//! Audio platform seam, acquisition, and the preprocessing chain

pub mod acquire;
pub mod chain;
pub mod cpal_platform;
pub mod dsp;
pub mod meter;
pub mod platform;

pub use chain::{ChainMode, ProcessingChain, SignalPath};
pub use cpal_platform::{CpalPlatform, DeviceInfo};
pub use meter::{LevelMonitor, LevelReading};
pub use platform::{
    AudioContext, AudioPlatform, CaptureConstraints, CaptureStream, CaptureTap, ContextState,
};
