//! Reference tempo engine based on onset intervals
//!
//! Detects rhythmic onsets with an envelope follower (fast attack, slow
//! release, adaptive noise floor), votes on the tempo implied by the
//! intervals between nearby onsets, and accumulates the dominant tempo of
//! each 500ms analysis window into a support histogram:
//!
//! ```text
//! samples -> OnsetDetector -> onset frames -> interval votes
//!         -> window tempo -> support bins -> running candidates
//!                                         -> stable (once the leader holds)
//! ```
//!
//! The engine runs on its own worker thread and reads from an
//! [`EngineSource`]; events go out through the session's [`EngineListener`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::dsp::time_to_coeff;
use crate::detection::candidate::TempoCandidate;
use crate::detection::engine::{
    engine_channel, EngineEvent, EngineFactory, EngineInput, EngineListener, EngineOptions,
    EngineSource, TempoEngine, DEFAULT_INPUT_CAPACITY,
};
use crate::error::EngineError;

/// Lowest tempo reported; slower interval votes are doubled into range
const MIN_BPM: f64 = 60.0;

/// Tempo ceiling (exclusive); faster votes are halved into range
const MAX_BPM: f64 = 200.0;

/// Analysis window hop
const HOP_MS: u64 = 500;

/// How far back onsets take part in a window's vote
const ANALYSIS_SPAN_SECS: f64 = 6.0;

/// Onsets needed before a window produces a tempo
const MIN_ONSETS: usize = 4;

/// Each onset is paired with up to this many following onsets
const MAX_PAIR_SPAN: usize = 3;

/// Window tempos within this distance share a support bin
const BIN_TOLERANCE_BPM: f64 = 1.0;

/// Candidates reported per event
const MAX_CANDIDATES: usize = 5;

/// Worker sleep when the input queue is empty
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Envelope-follower onset detector
///
/// # Example
/// ```
/// use bpm_listener_core::detection::onset::OnsetDetector;
///
/// let mut detector = OnsetDetector::new(8000);
/// for _ in 0..100 {
///     assert!(!detector.process(0.0));
/// }
/// assert!(detector.process(0.8));
/// ```
#[derive(Debug)]
pub struct OnsetDetector {
    envelope: f32,
    noise_floor: f32,
    threshold_ratio: f32,
    detected: bool,
    attack_coeff: f32,
    release_coeff: f32,
    noise_adapt_coeff: f32,
    min_gap_samples: usize,
    samples_since_onset: usize,
}

impl OnsetDetector {
    pub fn new(sample_rate: u32) -> Self {
        // Attack ~1ms catches the kick transient, release ~50ms rides
        // through its body so one hit yields one onset
        let attack_coeff = time_to_coeff(1.0, sample_rate);
        let release_coeff = time_to_coeff(50.0, sample_rate);
        let noise_adapt_coeff = time_to_coeff(500.0, sample_rate);

        // 250ms debounce caps detection at 240 BPM
        let min_gap_samples = (sample_rate as f64 * 0.25) as usize;

        Self {
            envelope: 0.0,
            noise_floor: 0.001,
            threshold_ratio: 4.0,
            detected: false,
            attack_coeff,
            release_coeff,
            noise_adapt_coeff,
            min_gap_samples,
            samples_since_onset: min_gap_samples,
        }
    }

    /// Process one sample; returns true on an onset
    pub fn process(&mut self, sample: f32) -> bool {
        let abs = sample.abs();
        self.samples_since_onset = self.samples_since_onset.saturating_add(1);

        let coeff = if abs > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = self.envelope * coeff + abs * (1.0 - coeff);

        let threshold = self.noise_floor.max(0.001) * self.threshold_ratio;

        if !self.detected
            && self.envelope > threshold
            && self.samples_since_onset >= self.min_gap_samples
        {
            self.detected = true;
            self.samples_since_onset = 0;
            return true;
        }

        // Hysteresis
        if self.detected && self.envelope < threshold * 0.5 {
            self.detected = false;
        }

        if !self.detected {
            self.noise_floor =
                self.noise_floor * self.noise_adapt_coeff + abs * (1.0 - self.noise_adapt_coeff);
        }

        false
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
        self.noise_floor = 0.001;
        self.detected = false;
        self.samples_since_onset = self.min_gap_samples;
    }
}

#[derive(Debug, Clone, Copy)]
struct SupportBin {
    tempo_sum: f64,
    count: u32,
}

impl SupportBin {
    fn tempo(&self) -> f64 {
        self.tempo_sum / self.count.max(1) as f64
    }
}

/// Window-by-window tempo accumulator
#[derive(Debug)]
pub struct TempoTracker {
    sample_rate: u32,
    options: EngineOptions,
    detector: OnsetDetector,
    frame: u64,
    hop_frames: u64,
    next_window: u64,
    span_frames: u64,
    onsets: VecDeque<u64>,
    bins: Vec<SupportBin>,
    leader: Option<usize>,
    leader_run: u32,
    stable_windows: u32,
    stable_emitted: bool,
}

impl TempoTracker {
    pub fn new(sample_rate: u32, options: &EngineOptions) -> Self {
        let hop_frames = (sample_rate as u64 * HOP_MS / 1000).max(1);
        let stable_windows = options.stabilization_time_ms.div_ceil(HOP_MS).max(1) as u32;
        Self {
            sample_rate,
            options: options.clone(),
            detector: OnsetDetector::new(sample_rate),
            frame: 0,
            hop_frames,
            next_window: hop_frames,
            span_frames: (sample_rate as f64 * ANALYSIS_SPAN_SECS) as u64,
            onsets: VecDeque::new(),
            bins: Vec::new(),
            leader: None,
            leader_run: 0,
            stable_windows,
            stable_emitted: false,
        }
    }

    /// Whether analysis has ended (stable reached without continuous mode)
    pub fn is_finished(&self) -> bool {
        self.stable_emitted && !self.options.continuous_analysis
    }

    /// Feed samples; returns the events produced by completed windows
    pub fn push(&mut self, samples: &[f32]) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for &sample in samples {
            if self.is_finished() {
                break;
            }
            if self.detector.process(sample) {
                self.onsets.push_back(self.frame);
            }
            self.frame += 1;
            if self.frame >= self.next_window {
                self.next_window += self.hop_frames;
                events.extend(self.close_window());
            }
        }
        events
    }

    /// Forget all accumulated analysis state
    pub fn reset(&mut self) {
        *self = Self::new(self.sample_rate, &self.options);
    }

    /// Current candidates ranked by support
    pub fn candidates(&self) -> Vec<TempoCandidate> {
        self.ranked()
            .into_iter()
            .take(MAX_CANDIDATES)
            .map(|i| TempoCandidate::new(self.bins[i].tempo(), self.bins[i].count))
            .collect()
    }

    fn ranked(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.bins.len()).collect();
        order.sort_by(|&a, &b| self.bins[b].count.cmp(&self.bins[a].count));
        order
    }

    fn close_window(&mut self) -> Vec<EngineEvent> {
        let horizon = self.frame.saturating_sub(self.span_frames);
        while self.onsets.front().is_some_and(|&f| f < horizon) {
            self.onsets.pop_front();
        }
        if self.onsets.len() < MIN_ONSETS {
            return Vec::new();
        }
        let Some(tempo) = self.window_tempo() else {
            return Vec::new();
        };
        self.record(tempo);

        let candidates = self.candidates();
        let mut events = vec![EngineEvent::Candidates(candidates.clone())];

        let leader = self.ranked().first().copied();
        if leader.is_some() && leader == self.leader {
            self.leader_run += 1;
        } else {
            self.leader = leader;
            self.leader_run = 1;
        }

        if !self.stable_emitted && self.leader_run >= self.stable_windows {
            self.stable_emitted = true;
            events.push(EngineEvent::Stable(candidates));
        }
        events
    }

    fn window_tempo(&self) -> Option<f64> {
        let onsets: Vec<u64> = self.onsets.iter().copied().collect();
        let mut votes = Vec::new();
        for i in 0..onsets.len() {
            for span in 1..=MAX_PAIR_SPAN {
                let Some(&later) = onsets.get(i + span) else {
                    break;
                };
                let interval = (later - onsets[i]) as f64 / self.sample_rate as f64;
                if interval > 0.0 {
                    votes.push((fold_tempo(60.0 / interval), 1.0 / span as f64));
                }
            }
        }

        let mut histogram = vec![0.0f64; MAX_BPM as usize + 2];
        for &(bpm, weight) in &votes {
            histogram[bpm.round() as usize] += weight;
        }

        let mut best: Option<(usize, f64)> = None;
        for bin in MIN_BPM as usize..MAX_BPM as usize {
            let score = histogram[bin] + 0.5 * (histogram[bin - 1] + histogram[bin + 1]);
            if score > 0.0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((bin, score));
            }
        }
        let (bin, _) = best?;

        let (sum, weight) = votes
            .iter()
            .filter(|(bpm, _)| (bpm - bin as f64).abs() <= 1.0)
            .fold((0.0, 0.0), |(s, w), &(bpm, weight)| {
                (s + bpm * weight, w + weight)
            });
        (weight > 0.0).then(|| sum / weight)
    }

    fn record(&mut self, tempo: f64) {
        let nearest = self
            .bins
            .iter_mut()
            .filter(|b| (b.tempo() - tempo).abs() <= BIN_TOLERANCE_BPM)
            .min_by(|a, b| {
                (a.tempo() - tempo)
                    .abs()
                    .total_cmp(&(b.tempo() - tempo).abs())
            });
        match nearest {
            Some(bin) => {
                bin.tempo_sum += tempo;
                bin.count += 1;
            }
            None => self.bins.push(SupportBin {
                tempo_sum: tempo,
                count: 1,
            }),
        }
    }
}

/// Fold a tempo into [`MIN_BPM`, `MAX_BPM`) by octaves
fn fold_tempo(mut bpm: f64) -> f64 {
    while bpm < MIN_BPM {
        bpm *= 2.0;
    }
    while bpm >= MAX_BPM {
        bpm /= 2.0;
    }
    bpm
}

struct EngineShared {
    running: AtomicBool,
    connected: AtomicBool,
    reset_requested: AtomicBool,
    listener: Mutex<Option<EngineListener>>,
}

impl EngineShared {
    fn emit(&self, event: EngineEvent) {
        let Ok(guard) = self.listener.lock() else {
            return;
        };
        let Some(listener) = guard.as_ref() else {
            return;
        };
        match event {
            EngineEvent::Candidates(c) => listener.running_candidates(c),
            EngineEvent::Stable(c) => listener.stable(c),
            EngineEvent::Fault(message) => listener.error(message),
        };
    }
}

/// Onset-interval tempo engine running on a worker thread
pub struct OnsetTempoEngine {
    shared: Arc<EngineShared>,
    worker: Option<JoinHandle<()>>,
}

impl OnsetTempoEngine {
    /// Spawn the analysis worker reading from `source`
    pub fn spawn(
        sample_rate: u32,
        options: &EngineOptions,
        source: EngineSource,
    ) -> Result<Self, EngineError> {
        if sample_rate == 0 {
            return Err(EngineError::Construction("sample rate is zero".into()));
        }

        let shared = Arc::new(EngineShared {
            running: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            reset_requested: AtomicBool::new(false),
            listener: Mutex::new(None),
        });
        let tracker = TempoTracker::new(sample_rate, options);
        let worker_shared = Arc::clone(&shared);

        let worker = std::thread::Builder::new()
            .name("tempo-engine".into())
            .spawn(move || Self::analyse(worker_shared, tracker, source))
            .map_err(|e| EngineError::Construction(e.to_string()))?;

        tracing::debug!(
            "Tempo engine started: {} Hz, stabilization {} ms, continuous {}",
            sample_rate,
            options.stabilization_time_ms,
            options.continuous_analysis
        );

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn analyse(shared: Arc<EngineShared>, mut tracker: TempoTracker, mut source: EngineSource) {
        let mut buf = vec![0.0f32; 4096];
        while shared.running.load(Ordering::Acquire) {
            if shared.reset_requested.swap(false, Ordering::AcqRel) {
                tracker.reset();
            }

            let dropped = source.take_dropped();
            if dropped > 0 {
                shared.emit(EngineEvent::Fault(format!(
                    "Input overrun: {} samples dropped",
                    dropped
                )));
            }

            let read = source.read(&mut buf);
            if read == 0 {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            if !shared.connected.load(Ordering::Acquire) || tracker.is_finished() {
                continue;
            }
            for event in tracker.push(&buf[..read]) {
                shared.emit(event);
            }
        }
        tracing::debug!("Tempo engine worker exited");
    }
}

impl TempoEngine for OnsetTempoEngine {
    fn subscribe(&mut self, listener: EngineListener) {
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = Some(listener);
        }
    }

    fn unsubscribe(&mut self) {
        if let Ok(mut slot) = self.shared.listener.lock() {
            *slot = None;
        }
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.shared.running.store(false, Ordering::Release);
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| EngineError::Operation("analysis worker panicked".into())),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), EngineError> {
        self.shared.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.shared.reset_requested.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for OnsetTempoEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Builds an [`OnsetTempoEngine`] per session
#[derive(Debug, Clone)]
pub struct OnsetEngineFactory {
    input_capacity: usize,
}

impl OnsetEngineFactory {
    pub fn new() -> Self {
        Self {
            input_capacity: DEFAULT_INPUT_CAPACITY,
        }
    }

    pub fn with_input_capacity(input_capacity: usize) -> Self {
        Self { input_capacity }
    }
}

impl Default for OnsetEngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory for OnsetEngineFactory {
    type Engine = OnsetTempoEngine;

    fn create(
        &mut self,
        sample_rate: u32,
        options: &EngineOptions,
    ) -> Result<(Self::Engine, EngineInput), EngineError> {
        let (input, source) = engine_channel(self.input_capacity);
        let engine = OnsetTempoEngine::spawn(sample_rate, options, source)?;
        Ok((engine, input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::event::SessionEvent;
    use approx::assert_abs_diff_eq;
    use tokio::sync::mpsc;

    const RATE: u32 = 8000;

    /// Decaying 60Hz hits at `bpm` for `seconds`
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

    fn stable_count(events: &[EngineEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, EngineEvent::Stable(_)))
            .count()
    }

    #[test]
    fn test_detector_single_onset_per_hit() {
        let mut detector = OnsetDetector::new(RATE);
        let onsets = click_track(120.0, 4.0)
            .into_iter()
            .filter(|&s| detector.process(s))
            .count();
        assert_eq!(onsets, 8);
    }

    #[test]
    fn test_detector_ignores_silence() {
        let mut detector = OnsetDetector::new(RATE);
        assert!((0..RATE).all(|_| !detector.process(0.0)));
    }

    #[test]
    fn test_fold_tempo() {
        assert_abs_diff_eq!(fold_tempo(40.0), 80.0);
        assert_abs_diff_eq!(fold_tempo(240.0), 120.0);
        assert_abs_diff_eq!(fold_tempo(200.0), 100.0);
        assert_abs_diff_eq!(fold_tempo(128.0), 128.0);
    }

    #[test]
    fn test_tracker_finds_120_bpm() {
        let mut tracker = TempoTracker::new(RATE, &EngineOptions::default());
        let events = tracker.push(&click_track(120.0, 8.0));

        let last = events
            .iter()
            .rev()
            .find_map(|e| match e {
                EngineEvent::Candidates(c) => Some(c.clone()),
                _ => None,
            })
            .expect("running candidates expected");
        assert_abs_diff_eq!(last[0].tempo, 120.0, epsilon = 0.5);
        assert!(last[0].support_count >= 10);
        assert_eq!(stable_count(&events), 1);
    }

    #[test]
    fn test_tracker_finds_90_bpm() {
        let mut tracker = TempoTracker::new(RATE, &EngineOptions::default());
        tracker.push(&click_track(90.0, 10.0));
        let top = tracker.candidates()[0];
        assert_abs_diff_eq!(top.tempo, 90.0, epsilon = 0.5);
    }

    #[test]
    fn test_tracker_silence_produces_nothing() {
        let mut tracker = TempoTracker::new(RATE, &EngineOptions::default());
        assert!(tracker.push(&vec![0.0; RATE as usize * 5]).is_empty());
        assert!(tracker.candidates().is_empty());
    }

    #[test]
    fn test_non_continuous_tracker_stops_after_stable() {
        let options = EngineOptions {
            continuous_analysis: false,
            stabilization_time_ms: 1000,
        };
        let mut tracker = TempoTracker::new(RATE, &options);
        let events = tracker.push(&click_track(120.0, 8.0));

        assert!(tracker.is_finished());
        assert!(matches!(events.last(), Some(EngineEvent::Stable(_))));
        assert!(tracker.push(&click_track(120.0, 2.0)).is_empty());
    }

    #[test]
    fn test_tracker_reset_clears_support() {
        let mut tracker = TempoTracker::new(RATE, &EngineOptions::default());
        tracker.push(&click_track(120.0, 4.0));
        assert!(!tracker.candidates().is_empty());

        tracker.reset();
        assert!(tracker.candidates().is_empty());
    }

    #[test]
    fn test_engine_reports_through_listener() {
        let mut factory = OnsetEngineFactory::new();
        let (mut engine, mut input) = factory.create(RATE, &EngineOptions::default()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.subscribe(EngineListener::new(tx, 3));

        for chunk in click_track(120.0, 4.0).chunks(1024) {
            input.write(chunk);
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let message = loop {
            if let Ok(message) = rx.try_recv() {
                break message;
            }
            assert!(std::time::Instant::now() < deadline, "no engine event");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(message.generation, 3);
        assert!(matches!(message.event, SessionEvent::Engine(_)));

        engine.stop().unwrap();
        engine.stop().unwrap();
    }

    #[test]
    fn test_factory_rejects_zero_sample_rate() {
        let mut factory = OnsetEngineFactory::new();
        assert!(matches!(
            factory.create(0, &EngineOptions::default()),
            Err(EngineError::Construction(_))
        ));
    }
}
