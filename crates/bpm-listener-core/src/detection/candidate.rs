//! Tempo candidates and payload validation

use serde::{Deserialize, Serialize};

/// One tempo estimate emitted by a tempo engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoCandidate {
    /// Estimated tempo in BPM
    pub tempo: f64,
    /// Number of analysis windows supporting this estimate
    pub support_count: u32,
}

impl TempoCandidate {
    pub fn new(tempo: f64, support_count: u32) -> Self {
        Self {
            tempo,
            support_count,
        }
    }

    /// Tempo rounded to the nearest integer BPM
    ///
    /// Only meaningful for candidates that passed [`is_valid`].
    pub fn rounded_bpm(&self) -> u32 {
        self.tempo.round() as u32
    }
}

/// Checks that a candidate list is well-formed
///
/// The list must be non-empty and its first tempo must be a finite number
/// strictly greater than zero. Anything else is engine noise.
pub fn is_valid(candidates: &[TempoCandidate]) -> bool {
    match candidates.first() {
        Some(top) => top.tempo.is_finite() && top.tempo > 0.0,
        None => false,
    }
}
