//! Error taxonomy for the session controller
//!
//! Only [`StartError`] (acquisition and construction failures) and the
//! detection timeout ever reach a caller, and only as an `Error` session
//! state carrying a user-facing message. [`TeardownFault`] is recovered
//! locally by the cleanup sequence.

use thiserror::Error;

/// Message shown when the platform refuses microphone access
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Microphone access denied. Please allow microphone access.";

/// Message shown when no capture device exists
pub const NO_DEVICE_MESSAGE: &str = "No microphone found. Please connect a microphone.";

/// Message shown when capture is not supported
pub const UNSUPPORTED_MESSAGE: &str = "Microphone not supported on this system.";

/// Message for any uncategorized start failure
pub const GENERIC_MESSAGE: &str = "An error occurred";

/// Message shown when no candidate passed the confidence gate in time
pub const DETECTION_TIMEOUT_MESSAGE: &str =
    "Could not detect BPM. Try with clearer rhythm or louder volume.";

/// Category of an acquisition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionCategory {
    PermissionDenied,
    NoDevice,
    Unsupported,
    Other,
}

/// Failure to obtain the capture stream or the audio context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No capture device: {0}")]
    NoDevice(String),

    #[error("Capture not supported: {0}")]
    Unsupported(String),

    #[error("Acquisition failed: {0}")]
    Other(String),
}

impl AcquisitionError {
    /// Category used to pick the user-facing message
    pub fn category(&self) -> AcquisitionCategory {
        match self {
            Self::PermissionDenied(_) => AcquisitionCategory::PermissionDenied,
            Self::NoDevice(_) => AcquisitionCategory::NoDevice,
            Self::Unsupported(_) => AcquisitionCategory::Unsupported,
            Self::Other(_) => AcquisitionCategory::Other,
        }
    }

    /// User-facing message for this failure
    pub fn user_message(&self) -> &'static str {
        match self.category() {
            AcquisitionCategory::PermissionDenied => PERMISSION_DENIED_MESSAGE,
            AcquisitionCategory::NoDevice => NO_DEVICE_MESSAGE,
            AcquisitionCategory::Unsupported => UNSUPPORTED_MESSAGE,
            AcquisitionCategory::Other => GENERIC_MESSAGE,
        }
    }
}

/// Failure of an audio context operation (resume, suspend, close)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("Audio context is closed")]
    Closed,

    #[error("Audio context operation failed: {0}")]
    Backend(String),
}

/// Failure reported by a tempo engine or its factory
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to construct tempo engine: {0}")]
    Construction(String),

    #[error("Tempo engine operation failed: {0}")]
    Operation(String),
}

/// Any failure while building a session in `start()`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Failed to connect signal path: {0}")]
    SignalPath(String),
}

impl StartError {
    /// User-facing message; construction failures use the generic text
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Acquisition(e) => e.user_message(),
            Self::Context(_) | Self::Engine(_) | Self::SignalPath(_) => GENERIC_MESSAGE,
        }
    }
}

/// Failure releasing one resource during teardown
///
/// Always logged and swallowed; never blocks the remaining teardown steps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeardownFault {
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("signal path: {0}")]
    SignalPath(String),

    #[error("capture: {0}")]
    Capture(String),

    #[error("context: {0}")]
    Context(#[from] ContextError),
}
