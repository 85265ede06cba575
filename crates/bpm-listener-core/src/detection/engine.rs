//! Tempo engine seam
//!
//! The tempo-estimation algorithm is an opaque collaborator. A session talks
//! to it through:
//! - an [`EngineInput`] the preprocessing chain writes samples into,
//! - an [`EngineListener`] the engine reports events through,
//! - the [`TempoEngine`] lifecycle operations (stop, disconnect, reset).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};

use crate::detection::candidate::TempoCandidate;
use crate::error::EngineError;
use crate::session::event::{InboxSender, SessionEvent, SessionMessage};

/// Default engine input capacity in samples (~2 seconds at 48kHz)
pub const DEFAULT_INPUT_CAPACITY: usize = 96_000;

fn default_continuous_analysis() -> bool {
    true
}

fn default_stabilization_time_ms() -> u64 {
    5000
}

/// Tunable engine options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOptions {
    /// Keep analysing after the stable event
    #[serde(default = "default_continuous_analysis")]
    pub continuous_analysis: bool,
    /// How long a leading tempo must hold before the stable event fires
    #[serde(default = "default_stabilization_time_ms")]
    pub stabilization_time_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            continuous_analysis: default_continuous_analysis(),
            stabilization_time_ms: default_stabilization_time_ms(),
        }
    }
}

/// Event emitted by a tempo engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Low-confidence running candidates, ranked by the engine
    Candidates(Vec<TempoCandidate>),
    /// One-shot high-confidence convergence signal
    Stable(Vec<TempoCandidate>),
    /// Advisory engine error; never changes session status
    Fault(String),
}

/// A tempo engine instance bound to one session
pub trait TempoEngine {
    /// Start reporting events through `listener`
    fn subscribe(&mut self, listener: EngineListener);

    /// Stop reporting events
    fn unsubscribe(&mut self);

    /// Stop analysis
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Detach from the engine input
    fn disconnect(&mut self) -> Result<(), EngineError>;

    /// Clear accumulated analysis state
    fn reset(&mut self) -> Result<(), EngineError>;
}

/// Builds one engine per session
pub trait EngineFactory {
    type Engine: TempoEngine;

    /// Create an engine for a stream at `sample_rate`
    ///
    /// Returns the engine and the input the preprocessing chain feeds.
    fn create(
        &mut self,
        sample_rate: u32,
        options: &EngineOptions,
    ) -> Result<(Self::Engine, EngineInput), EngineError>;
}

/// Subscription handle an engine reports events through
///
/// Events are forwarded into the controller inbox tagged with the session
/// generation. Once deactivated (at teardown) every delivery is dropped at
/// the source. The stable event is delivered at most once per subscription.
#[derive(Debug, Clone)]
pub struct EngineListener {
    inbox: InboxSender,
    generation: u64,
    active: Arc<AtomicBool>,
    stable_delivered: Arc<AtomicBool>,
}

impl EngineListener {
    pub(crate) fn new(inbox: InboxSender, generation: u64) -> Self {
        Self {
            inbox,
            generation,
            active: Arc::new(AtomicBool::new(true)),
            stable_delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report running candidates; returns whether the event was delivered
    pub fn running_candidates(&self, candidates: Vec<TempoCandidate>) -> bool {
        self.deliver(EngineEvent::Candidates(candidates))
    }

    /// Report the stable tempo; only the first call is delivered
    pub fn stable(&self, candidates: Vec<TempoCandidate>) -> bool {
        if !self.is_active() || self.stable_delivered.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.deliver(EngineEvent::Stable(candidates))
    }

    /// Report an advisory error
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.deliver(EngineEvent::Fault(message.into()))
    }

    /// Whether the session still listens to this subscription
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn deliver(&self, event: EngineEvent) -> bool {
        if !self.is_active() {
            return false;
        }
        self.inbox
            .send(SessionMessage {
                generation: self.generation,
                event: SessionEvent::Engine(event),
            })
            .is_ok()
    }
}

/// Writing half of the engine input queue (lives in the capture callback)
pub struct EngineInput {
    producer: HeapProd<f32>,
    dropped: Arc<AtomicU64>,
}

/// Reading half of the engine input queue (lives in the engine)
pub struct EngineSource {
    consumer: HeapCons<f32>,
    dropped: Arc<AtomicU64>,
}

/// Create a connected engine input/source pair
pub fn engine_channel(capacity: usize) -> (EngineInput, EngineSource) {
    let ring = HeapRb::<f32>::new(capacity.max(1));
    let (producer, consumer) = ring.split();
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EngineInput {
            producer,
            dropped: Arc::clone(&dropped),
        },
        EngineSource { consumer, dropped },
    )
}

impl EngineInput {
    /// Push samples; samples that do not fit are counted as dropped
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            self.dropped
                .fetch_add((samples.len() - written) as u64, Ordering::Relaxed);
        }
        written
    }
}

impl EngineSource {
    /// Pop up to `buf.len()` samples
    pub fn read(&mut self, buf: &mut [f32]) -> usize {
        self.consumer.pop_slice(buf)
    }

    /// Samples waiting to be read
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Samples dropped since the last call
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EngineInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInput").finish()
    }
}

impl std::fmt::Debug for EngineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSource")
            .field("available", &self.available())
            .finish()
    }
}
