//! Platform audio subsystem seam
//!
//! The session controller only ever talks to the platform through these
//! traits: an audio context it can resume, suspend, and close, and a
//! capture stream delivering mono samples into a [`CaptureTap`].

use crate::error::{AcquisitionError, ContextError};

/// Callback receiving captured mono samples (runs on the audio thread)
pub type CaptureTap = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Lifecycle state of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Processing audio
    Running,
    /// Alive but paused; can be resumed for the next session
    Suspended,
    /// Permanently released
    Closed,
}

/// Signal-conditioning features requested from the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub auto_gain_control: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl CaptureConstraints {
    /// Everything disabled
    ///
    /// Gain control, echo cancellation, and noise suppression all flatten
    /// the transient spikes that carry beat energy.
    pub const RAW: Self = Self {
        auto_gain_control: false,
        echo_cancellation: false,
        noise_suppression: false,
    };

    /// Whether any conditioning feature is requested
    pub fn any_enabled(&self) -> bool {
        self.auto_gain_control || self.echo_cancellation || self.noise_suppression
    }
}

/// Root of the platform's real-time audio graph
#[allow(async_fn_in_trait)]
pub trait AudioContext {
    fn state(&self) -> ContextState;

    fn sample_rate(&self) -> u32;

    async fn resume(&mut self) -> Result<(), ContextError>;

    async fn suspend(&mut self) -> Result<(), ContextError>;

    async fn close(&mut self) -> Result<(), ContextError>;
}

/// A live capture stream
pub trait CaptureStream {
    /// Stop every track of the stream (releases the device)
    fn stop_tracks(&mut self) -> Result<(), String>;
}

/// Provider of audio contexts and capture streams
#[allow(async_fn_in_trait)]
pub trait AudioPlatform {
    type Context: AudioContext;
    type Capture: CaptureStream;

    /// Construct a new audio context
    fn create_context(&mut self) -> Result<Self::Context, AcquisitionError>;

    /// Request a capture stream delivering samples into `tap`
    async fn open_capture(
        &mut self,
        context: &mut Self::Context,
        constraints: CaptureConstraints,
        tap: CaptureTap,
    ) -> Result<Self::Capture, AcquisitionError>;
}
