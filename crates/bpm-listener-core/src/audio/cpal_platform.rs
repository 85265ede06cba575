//! cpal-backed audio platform
//!
//! The "context" is the selected input device plus its default stream
//! configuration; the capture stream is a cpal input stream downmixed to
//! mono. cpal hands out unprocessed device samples, so raw capture needs no
//! extra configuration.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, Stream, StreamConfig, SupportedStreamConfig};

use crate::audio::platform::{
    AudioContext, AudioPlatform, CaptureConstraints, CaptureStream, CaptureTap, ContextState,
};
use crate::error::{AcquisitionError, ContextError};

/// Sample rates probed when listing devices
const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

/// Input device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Whether this is the default input device
    pub is_default: bool,
    /// Supported sample rates
    pub sample_rates: Vec<u32>,
    /// Number of input channels
    pub channels: u16,
}

/// Map a backend description to a category
///
/// Platforms report a refused microphone permission as a backend-specific
/// error, so the text is all there is to go on.
fn classify_backend(description: &str) -> AcquisitionError {
    let lower = description.to_lowercase();
    if ["permission", "denied", "not allowed", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        AcquisitionError::PermissionDenied(description.to_string())
    } else {
        AcquisitionError::Other(description.to_string())
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> AcquisitionError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            AcquisitionError::NoDevice(err.to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            AcquisitionError::Unsupported(err.to_string())
        }
        cpal::DefaultStreamConfigError::BackendSpecific { err } => {
            classify_backend(&err.description)
        }
        #[allow(unreachable_patterns)]
        other => AcquisitionError::Other(other.to_string()),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> AcquisitionError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AcquisitionError::NoDevice(err.to_string()),
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            AcquisitionError::Unsupported(err.to_string())
        }
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend(&err.description),
        other => AcquisitionError::Other(other.to_string()),
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> AcquisitionError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => AcquisitionError::NoDevice(err.to_string()),
        cpal::PlayStreamError::BackendSpecific { err } => classify_backend(&err.description),
        #[allow(unreachable_patterns)]
        other => AcquisitionError::Other(other.to_string()),
    }
}

/// Audio platform on cpal's default host
pub struct CpalPlatform {
    host: Host,
    device_name: Option<String>,
}

impl CpalPlatform {
    /// Use the default input device
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            device_name: None,
        }
    }

    /// Use the input device called `name`
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            host: cpal::default_host(),
            device_name: Some(name.into()),
        }
    }

    /// List input devices of the default host
    pub fn list_input_devices() -> anyhow::Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());
        let mut devices = Vec::new();

        for device in host.input_devices()? {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let channels = device
                .default_input_config()
                .map(|c| c.channels())
                .unwrap_or(0);

            let mut sample_rates = Vec::new();
            if let Ok(configs) = device.supported_input_configs() {
                for config in configs {
                    for &rate in &COMMON_RATES {
                        if (config.min_sample_rate().0..=config.max_sample_rate().0)
                            .contains(&rate)
                            && !sample_rates.contains(&rate)
                        {
                            sample_rates.push(rate);
                        }
                    }
                }
            }
            sample_rates.sort();

            devices.push(DeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                sample_rates,
                channels,
            });
        }

        Ok(devices)
    }

    fn select_device(&self) -> Result<Device, AcquisitionError> {
        match &self.device_name {
            Some(name) => self
                .host
                .input_devices()
                .map_err(|e| AcquisitionError::Other(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| AcquisitionError::NoDevice(format!("device not found: {}", name))),
            None => self
                .host
                .default_input_device()
                .ok_or_else(|| AcquisitionError::NoDevice("no default input device".into())),
        }
    }
}

impl Default for CpalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Selected input device and its stream configuration
///
/// Holds no stream of its own, so suspend and resume only track state;
/// the device is released when the capture stream is stopped.
pub struct CpalContext {
    device: Device,
    config: SupportedStreamConfig,
    device_name: String,
    state: ContextState,
}

impl CpalContext {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }
}

impl AudioContext for CpalContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    async fn resume(&mut self) -> Result<(), ContextError> {
        if self.state == ContextState::Closed {
            return Err(ContextError::Closed);
        }
        self.state = ContextState::Running;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), ContextError> {
        if self.state == ContextState::Closed {
            return Err(ContextError::Closed);
        }
        self.state = ContextState::Suspended;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContextError> {
        self.state = ContextState::Closed;
        tracing::debug!(device = %self.device_name, "Audio context closed");
        Ok(())
    }
}

/// A playing cpal input stream
pub struct CpalCapture {
    stream: Option<Stream>,
}

impl CaptureStream for CpalCapture {
    fn stop_tracks(&mut self) -> Result<(), String> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        // Dropping the stream releases the device even if pausing fails
        stream.pause().map_err(|e| e.to_string())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.stop_tracks();
    }
}

/// Frames downmixed per tap call; larger callback blocks are split
const MONO_CHUNK_FRAMES: usize = 1024;

/// Average interleaved frames into `mono`; returns the frame count
fn downmix<T>(interleaved: &[T], channels: usize, mono: &mut [f32]) -> usize
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    use cpal::Sample;

    let mut frames = 0;
    for (frame, out) in interleaved.chunks(channels).zip(mono.iter_mut()) {
        let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
        *out = sum / frame.len() as f32;
        frames += 1;
    }
    frames
}

fn build_mono_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut tap: CaptureTap,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono = vec![0.0f32; MONO_CHUNK_FRAMES];
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for chunk in data.chunks(channels * MONO_CHUNK_FRAMES) {
                let frames = downmix(chunk, channels, &mut mono);
                tap(&mono[..frames]);
            }
        },
        move |err| {
            tracing::error!("Input stream error: {}", err);
        },
        None,
    )
}

impl AudioPlatform for CpalPlatform {
    type Context = CpalContext;
    type Capture = CpalCapture;

    fn create_context(&mut self) -> Result<CpalContext, AcquisitionError> {
        let device = self.select_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = device.default_input_config().map_err(map_config_error)?;

        tracing::info!(
            "Input device: {} ({} Hz, {} channels, {:?})",
            device_name,
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );

        Ok(CpalContext {
            device,
            config,
            device_name,
            state: ContextState::Running,
        })
    }

    async fn open_capture(
        &mut self,
        context: &mut CpalContext,
        constraints: CaptureConstraints,
        tap: CaptureTap,
    ) -> Result<CpalCapture, AcquisitionError> {
        if constraints.any_enabled() {
            return Err(AcquisitionError::Unsupported(
                "cpal does not provide input signal conditioning".into(),
            ));
        }
        if context.state == ContextState::Closed {
            return Err(AcquisitionError::Other(ContextError::Closed.to_string()));
        }

        let config: StreamConfig = context.config.config();
        let stream = match context.config.sample_format() {
            SampleFormat::F32 => build_mono_stream::<f32>(&context.device, &config, tap),
            SampleFormat::I16 => build_mono_stream::<i16>(&context.device, &config, tap),
            SampleFormat::U16 => build_mono_stream::<u16>(&context.device, &config, tap),
            other => {
                return Err(AcquisitionError::Unsupported(format!(
                    "sample format {:?}",
                    other
                )))
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(map_play_error)?;
        tracing::info!(
            "Capture started: {} @ {} Hz",
            context.device_name,
            config.sample_rate.0
        );

        Ok(CpalCapture {
            stream: Some(stream),
        })
    }
}
