//! Teardown of a session's resources
//!
//! Every resource lives in an `Option` and is taken before release, so a
//! second teardown finds nothing to do. Each step runs regardless of the
//! previous step's outcome; faults are logged and collected, never
//! propagated.

use crate::audio::chain::SignalPath;
use crate::audio::platform::{AudioContext, CaptureStream, ContextState};
use crate::detection::engine::{EngineListener, TempoEngine};
use crate::error::TeardownFault;
use crate::session::timeout::TimeoutGuard;

/// Everything a session acquires besides the shared audio context
#[derive(Debug)]
pub struct SessionResources<C, E> {
    pub timeout: TimeoutGuard,
    pub listener: Option<EngineListener>,
    pub engine: Option<E>,
    pub signal_path: Option<SignalPath>,
    pub capture: Option<C>,
}

impl<C, E> SessionResources<C, E> {
    pub fn new() -> Self {
        Self {
            timeout: TimeoutGuard::new(),
            listener: None,
            engine: None,
            signal_path: None,
            capture: None,
        }
    }

    /// Whether anything is still held
    pub fn is_empty(&self) -> bool {
        !self.timeout.is_armed()
            && self.listener.is_none()
            && self.engine.is_none()
            && self.signal_path.is_none()
            && self.capture.is_none()
    }
}

impl<C, E> Default for SessionResources<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// How far teardown goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownMode {
    /// Close the audio context instead of suspending it
    pub close_context: bool,
    /// Clear the engine's accumulated analysis before releasing it
    pub reset_engine: bool,
}

impl TeardownMode {
    /// Session end; the context is kept for the next session
    pub const SUSPEND: Self = Self {
        close_context: false,
        reset_engine: false,
    };

    /// User reset
    pub const RESET: Self = Self {
        close_context: false,
        reset_engine: true,
    };

    /// Controller disposal
    pub const CLOSE: Self = Self {
        close_context: true,
        reset_engine: false,
    };
}

/// Outcome of one teardown run
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Resources released, in release order
    pub released: Vec<&'static str>,
    /// Chain stages released, in release order
    pub stages: Vec<&'static str>,
    /// Faults recovered along the way
    pub faults: Vec<TeardownFault>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }

    fn fault(&mut self, fault: TeardownFault) {
        tracing::warn!("Teardown fault ignored: {}", fault);
        self.faults.push(fault);
    }
}

/// Release `resources` and suspend or close `context`
pub async fn teardown<C, E, X>(
    resources: &mut SessionResources<C, E>,
    context: &mut Option<X>,
    mode: TeardownMode,
) -> TeardownReport
where
    C: CaptureStream,
    E: TempoEngine,
    X: AudioContext,
{
    let mut report = TeardownReport::default();

    if resources.timeout.cancel() {
        report.released.push("timeout");
    }

    if let Some(listener) = resources.listener.take() {
        listener.deactivate();
        if let Some(engine) = resources.engine.as_mut() {
            engine.unsubscribe();
        }
        report.released.push("subscription");
    }

    if let Some(mut engine) = resources.engine.take() {
        if mode.reset_engine {
            if let Err(e) = engine.reset() {
                report.fault(e.into());
            }
        }
        if let Err(e) = engine.stop() {
            report.fault(e.into());
        }
        if let Err(e) = engine.disconnect() {
            report.fault(e.into());
        }
        report.released.push("engine");
    }

    if let Some(path) = resources.signal_path.take() {
        match path.disconnect() {
            Ok(stages) => report.stages = stages.unwrap_or_default(),
            Err(fault) => report.fault(fault),
        }
        report.released.push("signal-path");
    }

    if let Some(mut capture) = resources.capture.take() {
        if let Err(e) = capture.stop_tracks() {
            report.fault(TeardownFault::Capture(e));
        }
        report.released.push("capture");
    }

    if mode.close_context {
        if let Some(mut ctx) = context.take() {
            if ctx.state() != ContextState::Closed {
                if let Err(e) = ctx.close().await {
                    report.fault(e.into());
                }
            }
            report.released.push("context");
        }
    } else if let Some(ctx) = context.as_mut() {
        if ctx.state() == ContextState::Running {
            if let Err(e) = ctx.suspend().await {
                report.fault(e.into());
            }
            report.released.push("context");
        }
    }

    if !report.released.is_empty() {
        tracing::debug!(
            released = ?report.released,
            faults = report.faults.len(),
            "Session resources released"
        );
    }
    report
}
