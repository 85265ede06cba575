//! Confidence gate over the two engine event classes
//!
//! Running candidates arrive repeatedly and are accepted early only when the
//! top candidate is supported by enough analysis windows. The stable event
//! has already passed the engine's own confidence test and only needs to be
//! well-formed. The gate is a pure function of the event, so it can be
//! called for both producers in any order.

use crate::detection::candidate::{is_valid, TempoCandidate};
use crate::detection::engine::EngineEvent;

/// Default support count for early acceptance of a running candidate
pub const DEFAULT_CONFIDENCE_THRESHOLD: u32 = 5;

/// Which producer an accepted result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    RunningCandidate,
    Stable,
}

/// Why an event was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Malformed,
    BelowThreshold { support: u32 },
}

/// Outcome of routing one engine event
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Terminal detection
    Accept {
        bpm: u32,
        tempo: f64,
        source: DetectionSource,
    },
    /// No state change
    Ignore(IgnoreReason),
    /// Engine error to log
    Advisory(String),
}

/// Gate turning engine events into verdicts
#[derive(Debug, Clone, Copy)]
pub struct DetectionRouter {
    confidence_threshold: u32,
}

impl DetectionRouter {
    pub fn new(confidence_threshold: u32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> u32 {
        self.confidence_threshold
    }

    /// Route one engine event
    pub fn route(&self, event: &EngineEvent) -> Verdict {
        match event {
            EngineEvent::Candidates(candidates) => {
                let Some(top) = Self::valid_top(candidates) else {
                    return Verdict::Ignore(IgnoreReason::Malformed);
                };
                if top.support_count >= self.confidence_threshold {
                    Self::accept(top, DetectionSource::RunningCandidate)
                } else {
                    Verdict::Ignore(IgnoreReason::BelowThreshold {
                        support: top.support_count,
                    })
                }
            }
            EngineEvent::Stable(candidates) => match Self::valid_top(candidates) {
                Some(top) => Self::accept(top, DetectionSource::Stable),
                None => Verdict::Ignore(IgnoreReason::Malformed),
            },
            EngineEvent::Fault(message) => Verdict::Advisory(message.clone()),
        }
    }

    fn valid_top(candidates: &[TempoCandidate]) -> Option<&TempoCandidate> {
        if is_valid(candidates) {
            candidates.first()
        } else {
            None
        }
    }

    fn accept(top: &TempoCandidate, source: DetectionSource) -> Verdict {
        Verdict::Accept {
            bpm: top.rounded_bpm(),
            tempo: top.tempo,
            source,
        }
    }
}

impl Default for DetectionRouter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(tempo: f64, support: u32) -> Vec<TempoCandidate> {
        vec![TempoCandidate::new(tempo, support)]
    }

    #[test]
    fn test_running_candidate_below_threshold_ignored() {
        let router = DetectionRouter::new(5);
        let verdict = router.route(&EngineEvent::Candidates(candidates(90.2, 3)));
        assert_eq!(
            verdict,
            Verdict::Ignore(IgnoreReason::BelowThreshold { support: 3 })
        );
    }

    #[test]
    fn test_running_candidate_at_threshold_accepted() {
        let router = DetectionRouter::new(5);
        let verdict = router.route(&EngineEvent::Candidates(candidates(90.2, 5)));
        assert_eq!(
            verdict,
            Verdict::Accept {
                bpm: 90,
                tempo: 90.2,
                source: DetectionSource::RunningCandidate
            }
        );
    }

    #[test]
    fn test_only_top_candidate_is_gated() {
        let router = DetectionRouter::new(5);
        let event = EngineEvent::Candidates(vec![
            TempoCandidate::new(120.0, 2),
            TempoCandidate::new(60.0, 30),
        ]);
        assert!(matches!(router.route(&event), Verdict::Ignore(_)));
    }

    #[test]
    fn test_stable_event_has_no_support_gate() {
        let router = DetectionRouter::new(10);
        let verdict = router.route(&EngineEvent::Stable(candidates(128.4, 1)));
        assert_eq!(
            verdict,
            Verdict::Accept {
                bpm: 128,
                tempo: 128.4,
                source: DetectionSource::Stable
            }
        );
    }

    #[test]
    fn test_malformed_payloads_ignored() {
        let router = DetectionRouter::default();
        for event in [
            EngineEvent::Candidates(vec![]),
            EngineEvent::Candidates(candidates(f64::NAN, 50)),
            EngineEvent::Stable(candidates(0.0, 50)),
            EngineEvent::Stable(candidates(-90.0, 50)),
            EngineEvent::Stable(vec![]),
        ] {
            assert_eq!(
                router.route(&event),
                Verdict::Ignore(IgnoreReason::Malformed),
                "{:?}",
                event
            );
        }
    }

    #[test]
    fn test_fault_is_advisory() {
        let router = DetectionRouter::default();
        let verdict = router.route(&EngineEvent::Fault("analysis fault".into()));
        assert_eq!(verdict, Verdict::Advisory("analysis fault".into()));
    }
}
