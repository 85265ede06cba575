//! Preprocessing chain and the capture-to-engine signal path
//!
//! Emphasises kick-drum transients before tempo analysis:
//! low-pass -> compressor -> makeup gain -> level meter.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::audio::dsp::{Compressor, LowPass, MakeupGain, Stage};
use crate::audio::meter::{LevelMeter, LevelMonitor};
use crate::audio::platform::CaptureTap;
use crate::detection::engine::EngineInput;
use crate::error::{StartError, TeardownFault};

pub const LOW_PASS_CUTOFF_HZ: f32 = 150.0;
pub const LOW_PASS_Q: f32 = 1.0;
pub const COMPRESSOR_THRESHOLD_DB: f32 = -30.0;
pub const COMPRESSOR_KNEE_DB: f32 = 10.0;
pub const COMPRESSOR_RATIO: f32 = 8.0;
pub const COMPRESSOR_ATTACK_MS: f32 = 3.0;
pub const COMPRESSOR_RELEASE_MS: f32 = 100.0;
pub const MAKEUP_GAIN_DB: f32 = 12.0;

/// Capture blocks are processed in chunks of at most this many samples
const CHUNK_SAMPLES: usize = 1024;

/// Which stages sit between capture and the engine input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Full preprocessing
    #[default]
    Full,
    /// Capture feeds the engine input unmodified
    Direct,
}

/// Ordered list of processing stages
pub struct ProcessingChain {
    stages: Vec<Box<dyn Stage>>,
}

impl ProcessingChain {
    /// Build the chain for a stream at `sample_rate`
    pub fn build(sample_rate: u32, mode: ChainMode, monitor: &LevelMonitor) -> Self {
        let stages: Vec<Box<dyn Stage>> = match mode {
            ChainMode::Direct => Vec::new(),
            ChainMode::Full => vec![
                Box::new(LowPass::new(sample_rate, LOW_PASS_CUTOFF_HZ, LOW_PASS_Q)),
                Box::new(Compressor::new(
                    sample_rate,
                    COMPRESSOR_THRESHOLD_DB,
                    COMPRESSOR_KNEE_DB,
                    COMPRESSOR_RATIO,
                    COMPRESSOR_ATTACK_MS,
                    COMPRESSOR_RELEASE_MS,
                )),
                Box::new(MakeupGain::from_db(MAKEUP_GAIN_DB)),
                Box::new(LevelMeter::new(sample_rate, monitor.clone())),
            ],
        };
        Self { stages }
    }

    pub fn process(&mut self, block: &mut [f32]) {
        for stage in &mut self.stages {
            stage.process(block);
        }
    }

    /// Stage names in connection order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Release every stage, last connected first
    ///
    /// Returns the names in release order.
    pub fn teardown(mut self) -> Vec<&'static str> {
        let mut released = Vec::with_capacity(self.stages.len());
        while let Some(stage) = self.stages.pop() {
            tracing::trace!(stage = stage.name(), "Released stage");
            released.push(stage.name());
        }
        released
    }
}

impl std::fmt::Debug for ProcessingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

struct Route {
    chain: ProcessingChain,
    input: EngineInput,
    scratch: Vec<f32>,
}

impl Route {
    fn feed(&mut self, samples: &[f32]) {
        for chunk in samples.chunks(CHUNK_SAMPLES) {
            let block = &mut self.scratch[..chunk.len()];
            block.copy_from_slice(chunk);
            self.chain.process(block);
            self.input.write(block);
        }
    }
}

/// Connection from the capture tap through the chain into the engine input
///
/// The capture callback only ever `try_lock`s the route; when the route is
/// being connected or torn down the block is skipped.
#[derive(Clone, Default)]
pub struct SignalPath {
    route: Arc<Mutex<Option<Route>>>,
}

impl SignalPath {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture callback feeding this path
    pub fn tap(&self) -> CaptureTap {
        let route = Arc::clone(&self.route);
        Box::new(move |samples: &[f32]| {
            if let Ok(mut guard) = route.try_lock() {
                if let Some(route) = guard.as_mut() {
                    route.feed(samples);
                }
            }
        })
    }

    /// Route captured samples through `chain` into `input`
    pub fn connect(&self, chain: ProcessingChain, input: EngineInput) -> Result<(), StartError> {
        let mut guard = self
            .route
            .lock()
            .map_err(|_| StartError::SignalPath("route lock poisoned".into()))?;
        if guard.is_some() {
            return Err(StartError::SignalPath("already connected".into()));
        }
        tracing::debug!(stages = ?chain.stage_names(), "Signal path connected");
        *guard = Some(Route {
            chain,
            input,
            scratch: vec![0.0; CHUNK_SAMPLES],
        });
        Ok(())
    }

    /// Detach the route and tear the chain down
    ///
    /// Returns the released stage names, or None when nothing was connected.
    pub fn disconnect(&self) -> Result<Option<Vec<&'static str>>, TeardownFault> {
        let route = self
            .route
            .lock()
            .map_err(|_| TeardownFault::SignalPath("route lock poisoned".into()))?
            .take();
        Ok(route.map(|route| route.chain.teardown()))
    }

    pub fn is_connected(&self) -> bool {
        self.route.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl std::fmt::Debug for SignalPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalPath")
            .field("connected", &self.is_connected())
            .finish()
    }
}
