//! Tempo detection: the engine seam, the confidence gate, and a reference
//! onset-based engine
//!
//! - Candidate validation ([`candidate`])
//! - Engine traits, subscription, and input queue ([`engine`])
//! - Confidence gate over engine events ([`router`])
//! - Envelope-follower onset engine ([`onset`])

pub mod candidate;
pub mod engine;
pub mod onset;
pub mod router;

pub use candidate::{is_valid, TempoCandidate};
pub use engine::{EngineEvent, EngineFactory, EngineInput, EngineListener, EngineOptions, TempoEngine};
pub use onset::{OnsetEngineFactory, OnsetTempoEngine};
pub use router::{DetectionRouter, Verdict};
