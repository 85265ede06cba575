//! In-memory platform and engine fakes
//!
//! Used by the unit tests and, with the `test-support` feature, by the
//! integration tests. Every resource operation is recorded in a shared
//! [`Probe`] so tests can assert on acquisition, release, and ordering.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::audio::platform::{
    AudioContext, AudioPlatform, CaptureConstraints, CaptureStream, CaptureTap, ContextState,
};
use crate::detection::candidate::TempoCandidate;
use crate::detection::engine::{
    engine_channel, EngineFactory, EngineInput, EngineListener, EngineOptions, EngineSource,
    TempoEngine,
};
use crate::error::{AcquisitionError, ContextError, EngineError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counters of every recorded resource operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeCounts {
    pub contexts_created: usize,
    pub resumes: usize,
    pub suspends: usize,
    pub closes: usize,
    pub captures_opened: usize,
    pub tracks_stopped: usize,
    pub engines_created: usize,
    pub subscriptions: usize,
    pub unsubscriptions: usize,
    pub engine_stops: usize,
    pub engine_resets: usize,
    pub engine_disconnects: usize,
}

impl ProbeCounts {
    /// Capture streams opened and not yet stopped
    pub fn live_captures(&self) -> usize {
        self.captures_opened.saturating_sub(self.tracks_stopped)
    }

    /// Engine subscriptions not yet removed
    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.saturating_sub(self.unsubscriptions)
    }
}

#[derive(Debug, Default)]
struct ProbeLog {
    counts: ProbeCounts,
    journal: Vec<&'static str>,
}

/// Shared recorder of resource operations
#[derive(Debug, Clone, Default)]
pub struct Probe {
    log: Arc<Mutex<ProbeLog>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> ProbeCounts {
        lock(&self.log).counts.clone()
    }

    /// Operation names in the order they happened
    pub fn journal(&self) -> Vec<&'static str> {
        lock(&self.log).journal.clone()
    }

    pub fn clear_journal(&self) {
        lock(&self.log).journal.clear();
    }

    fn record(&self, step: &'static str, bump: impl FnOnce(&mut ProbeCounts)) {
        let mut log = lock(&self.log);
        bump(&mut log.counts);
        log.journal.push(step);
    }
}

/// Releases a platform blocked in `open_capture`
#[derive(Debug)]
pub struct PermissionGate {
    release: oneshot::Sender<()>,
}

impl PermissionGate {
    /// Let the pending capture request proceed
    pub fn grant(self) {
        let _ = self.release.send(());
    }
}

/// Pushes samples into the currently open fake capture stream
#[derive(Clone, Default)]
pub struct CaptureFeeder {
    tap: Arc<Mutex<Option<CaptureTap>>>,
}

impl CaptureFeeder {
    /// Deliver a block as the audio callback would; false when no stream is open
    pub fn feed(&self, samples: &[f32]) -> bool {
        match lock(&self.tap).as_mut() {
            Some(tap) => {
                tap(samples);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.tap).is_some()
    }
}

/// Fake audio context
#[derive(Debug)]
pub struct FakeContext {
    probe: Probe,
    state: ContextState,
    sample_rate: u32,
    fail_suspend: bool,
}

impl AudioContext for FakeContext {
    fn state(&self) -> ContextState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn resume(&mut self) -> Result<(), ContextError> {
        if self.state == ContextState::Closed {
            return Err(ContextError::Closed);
        }
        self.probe.record("context.resume", |c| c.resumes += 1);
        self.state = ContextState::Running;
        Ok(())
    }

    async fn suspend(&mut self) -> Result<(), ContextError> {
        if self.state == ContextState::Closed {
            return Err(ContextError::Closed);
        }
        self.probe.record("context.suspend", |c| c.suspends += 1);
        if self.fail_suspend {
            return Err(ContextError::Backend("suspend refused".into()));
        }
        self.state = ContextState::Suspended;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContextError> {
        self.probe.record("context.close", |c| c.closes += 1);
        self.state = ContextState::Closed;
        Ok(())
    }
}

/// Fake capture stream
pub struct FakeCapture {
    probe: Probe,
    feeder: CaptureFeeder,
    fail_stop: bool,
}

impl std::fmt::Debug for FakeCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeCapture")
            .field("probe", &self.probe)
            .field("fail_stop", &self.fail_stop)
            .finish_non_exhaustive()
    }
}

impl CaptureStream for FakeCapture {
    fn stop_tracks(&mut self) -> Result<(), String> {
        self.probe.record("capture.stop", |c| c.tracks_stopped += 1);
        lock(&self.feeder.tap).take();
        if self.fail_stop {
            return Err("track already ended".into());
        }
        Ok(())
    }
}

/// Fake platform with failure injection
pub struct FakePlatform {
    probe: Probe,
    sample_rate: u32,
    context_failure: Option<AcquisitionError>,
    capture_failure: Option<AcquisitionError>,
    gate: Option<oneshot::Receiver<()>>,
    fail_track_stop: bool,
    fail_suspend: bool,
    feeder: CaptureFeeder,
    last_constraints: Option<CaptureConstraints>,
}

impl FakePlatform {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            sample_rate: 48000,
            context_failure: None,
            capture_failure: None,
            gate: None,
            fail_track_stop: false,
            fail_suspend: false,
            feeder: CaptureFeeder::default(),
            last_constraints: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Refuse the capture request with `err`
    pub fn failing_with(mut self, err: AcquisitionError) -> Self {
        self.capture_failure = Some(err);
        self
    }

    /// Refuse to construct an audio context
    pub fn failing_context(mut self, err: AcquisitionError) -> Self {
        self.context_failure = Some(err);
        self
    }

    /// Hold the next capture request until the gate is granted (or dropped)
    pub fn with_permission_gate(mut self) -> (Self, PermissionGate) {
        let (release, gate) = oneshot::channel();
        self.gate = Some(gate);
        (self, PermissionGate { release })
    }

    pub fn failing_track_stop(mut self) -> Self {
        self.fail_track_stop = true;
        self
    }

    pub fn failing_suspend(mut self) -> Self {
        self.fail_suspend = true;
        self
    }

    pub fn feeder(&self) -> CaptureFeeder {
        self.feeder.clone()
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.last_constraints
    }
}

impl AudioPlatform for FakePlatform {
    type Context = FakeContext;
    type Capture = FakeCapture;

    fn create_context(&mut self) -> Result<FakeContext, AcquisitionError> {
        if let Some(err) = self.context_failure.clone() {
            return Err(err);
        }
        self.probe
            .record("context.create", |c| c.contexts_created += 1);
        Ok(FakeContext {
            probe: self.probe.clone(),
            state: ContextState::Running,
            sample_rate: self.sample_rate,
            fail_suspend: self.fail_suspend,
        })
    }

    async fn open_capture(
        &mut self,
        _context: &mut FakeContext,
        constraints: CaptureConstraints,
        tap: CaptureTap,
    ) -> Result<FakeCapture, AcquisitionError> {
        self.last_constraints = Some(constraints);
        if let Some(gate) = self.gate.take() {
            let _ = gate.await;
        }
        if let Some(err) = self.capture_failure.clone() {
            return Err(err);
        }
        self.probe
            .record("capture.open", |c| c.captures_opened += 1);
        *lock(&self.feeder.tap) = Some(tap);
        Ok(FakeCapture {
            probe: self.probe.clone(),
            feeder: self.feeder.clone(),
            fail_stop: self.fail_track_stop,
        })
    }
}

/// Test-side control of the most recently created fake engine
#[derive(Clone, Default)]
pub struct EngineRemote {
    listener: Arc<Mutex<Option<EngineListener>>>,
    source: Arc<Mutex<Option<EngineSource>>>,
}

impl EngineRemote {
    /// Emit running candidates; false when nobody is subscribed
    pub fn emit_candidates(&self, candidates: Vec<TempoCandidate>) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|l| l.running_candidates(candidates))
    }

    /// Emit the stable event
    pub fn emit_stable(&self, candidates: Vec<TempoCandidate>) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|l| l.stable(candidates))
    }

    /// Emit an advisory error
    pub fn emit_error(&self, message: &str) -> bool {
        lock(&self.listener)
            .as_ref()
            .is_some_and(|l| l.error(message))
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.listener).is_some()
    }

    /// Drain every sample that reached the engine input
    pub fn drain_input(&self) -> Vec<f32> {
        let mut guard = lock(&self.source);
        let Some(source) = guard.as_mut() else {
            return Vec::new();
        };
        let mut samples = vec![0.0f32; source.available()];
        let n = source.read(&mut samples);
        samples.truncate(n);
        samples
    }
}

/// Fake tempo engine
pub struct FakeEngine {
    probe: Probe,
    remote: EngineRemote,
    fail_stop: bool,
}

impl TempoEngine for FakeEngine {
    fn subscribe(&mut self, listener: EngineListener) {
        self.probe
            .record("engine.subscribe", |c| c.subscriptions += 1);
        *lock(&self.remote.listener) = Some(listener);
    }

    fn unsubscribe(&mut self) {
        self.probe
            .record("engine.unsubscribe", |c| c.unsubscriptions += 1);
        lock(&self.remote.listener).take();
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.probe.record("engine.stop", |c| c.engine_stops += 1);
        if self.fail_stop {
            return Err(EngineError::Operation("stop failed".into()));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.probe
            .record("engine.disconnect", |c| c.engine_disconnects += 1);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.probe
            .record("engine.reset", |c| c.engine_resets += 1);
        Ok(())
    }
}

/// Factory for [`FakeEngine`]s
pub struct FakeEngineFactory {
    probe: Probe,
    remote: EngineRemote,
    construction_failure: Option<EngineError>,
    fail_stop: bool,
    input_capacity: usize,
    last_options: Option<EngineOptions>,
}

impl FakeEngineFactory {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            remote: EngineRemote::default(),
            construction_failure: None,
            fail_stop: false,
            input_capacity: 1 << 16,
            last_options: None,
        }
    }

    pub fn failing_construction(mut self, err: EngineError) -> Self {
        self.construction_failure = Some(err);
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn remote(&self) -> EngineRemote {
        self.remote.clone()
    }

    pub fn last_options(&self) -> Option<&EngineOptions> {
        self.last_options.as_ref()
    }
}

impl EngineFactory for FakeEngineFactory {
    type Engine = FakeEngine;

    fn create(
        &mut self,
        _sample_rate: u32,
        options: &EngineOptions,
    ) -> Result<(FakeEngine, EngineInput), EngineError> {
        self.last_options = Some(options.clone());
        if let Some(err) = self.construction_failure.clone() {
            return Err(err);
        }
        self.probe
            .record("engine.create", |c| c.engines_created += 1);
        let (input, source) = engine_channel(self.input_capacity);
        *lock(&self.remote.source) = Some(source);
        Ok((
            FakeEngine {
                probe: self.probe.clone(),
                remote: self.remote.clone(),
                fail_stop: self.fail_stop,
            },
            input,
        ))
    }
}
