//! Acquisition of the audio context and the raw capture stream

use crate::audio::platform::{
    AudioContext, AudioPlatform, CaptureConstraints, CaptureTap, ContextState,
};
use crate::error::{AcquisitionError, ContextError, StartError};

/// Get a running audio context into `slot`
///
/// A live context is reused (resumed when suspended), a closed one is
/// replaced, and a missing one is created.
pub async fn prepare_context<'a, P: AudioPlatform>(
    platform: &mut P,
    slot: &'a mut Option<P::Context>,
) -> Result<&'a mut P::Context, StartError> {
    let reusable = matches!(
        slot.as_ref().map(|c| c.state()),
        Some(ContextState::Running | ContextState::Suspended)
    );
    if !reusable {
        if slot.is_some() {
            tracing::debug!("Replacing closed audio context");
        }
        let context = platform.create_context()?;
        tracing::info!(sample_rate = context.sample_rate(), "Audio context created");
        *slot = Some(context);
    }

    let Some(context) = slot.as_mut() else {
        return Err(ContextError::Closed.into());
    };
    if context.state() == ContextState::Suspended {
        context.resume().await?;
        tracing::debug!("Audio context resumed");
    }
    Ok(context)
}

/// Request a capture stream with all signal conditioning disabled
pub async fn open_raw_capture<P: AudioPlatform>(
    platform: &mut P,
    context: &mut P::Context,
    tap: CaptureTap,
) -> Result<P::Capture, AcquisitionError> {
    let constraints = CaptureConstraints::RAW;
    tracing::debug!(?constraints, "Requesting capture stream");
    let capture = platform.open_capture(context, constraints, tap).await?;
    tracing::info!("Microphone access granted");
    Ok(capture)
}
