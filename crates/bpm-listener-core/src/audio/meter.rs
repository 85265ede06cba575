//! Diagnostic level meter
//!
//! The last stage of the chain. It never modifies samples and nothing in the
//! session makes decisions from its readings.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::dsp::Stage;

/// Meter window length
pub const METER_WINDOW_MS: u32 = 500;

/// One window of meter output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReading {
    pub peak: f32,
    pub rms: f32,
}

impl LevelReading {
    /// Peak level in dBFS
    pub fn peak_db(&self) -> f32 {
        20.0 * self.peak.max(1e-9).log10()
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    peak_bits: AtomicU32,
    rms_bits: AtomicU32,
    readings: AtomicU64,
}

/// Lock-free view of the most recent meter reading
///
/// Written from the audio callback, read from anywhere.
#[derive(Debug, Clone, Default)]
pub struct LevelMonitor {
    state: Arc<MonitorState>,
}

impl LevelMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest reading, or None before the first window completes
    pub fn latest(&self) -> Option<LevelReading> {
        if self.state.readings.load(Ordering::Acquire) == 0 {
            return None;
        }
        Some(LevelReading {
            peak: f32::from_bits(self.state.peak_bits.load(Ordering::Relaxed)),
            rms: f32::from_bits(self.state.rms_bits.load(Ordering::Relaxed)),
        })
    }

    /// Number of windows published so far
    pub fn reading_count(&self) -> u64 {
        self.state.readings.load(Ordering::Acquire)
    }

    fn publish(&self, reading: LevelReading) {
        self.state
            .peak_bits
            .store(reading.peak.to_bits(), Ordering::Relaxed);
        self.state
            .rms_bits
            .store(reading.rms.to_bits(), Ordering::Relaxed);
        self.state.readings.fetch_add(1, Ordering::Release);
    }
}

/// Pass-through stage measuring peak and RMS per window
#[derive(Debug)]
pub struct LevelMeter {
    window: usize,
    count: usize,
    peak: f32,
    sum_sq: f64,
    monitor: LevelMonitor,
}

impl LevelMeter {
    pub fn new(sample_rate: u32, monitor: LevelMonitor) -> Self {
        let window = (sample_rate as u64 * METER_WINDOW_MS as u64 / 1000).max(1) as usize;
        Self {
            window,
            count: 0,
            peak: 0.0,
            sum_sq: 0.0,
            monitor,
        }
    }
}

impl Stage for LevelMeter {
    fn name(&self) -> &'static str {
        "level-meter"
    }

    fn process(&mut self, block: &mut [f32]) {
        for &sample in block.iter() {
            self.peak = self.peak.max(sample.abs());
            self.sum_sq += (sample as f64) * (sample as f64);
            self.count += 1;

            if self.count == self.window {
                let reading = LevelReading {
                    peak: self.peak,
                    rms: (self.sum_sq / self.count as f64).sqrt() as f32,
                };
                tracing::trace!(peak = reading.peak, rms = reading.rms, "Level");
                self.monitor.publish(reading);
                self.count = 0;
                self.peak = 0.0;
                self.sum_sq = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_no_reading_before_first_window() {
        let monitor = LevelMonitor::new();
        let mut meter = LevelMeter::new(1000, monitor.clone());
        meter.process(&mut [0.5; 499]);
        assert!(monitor.latest().is_none());
        meter.process(&mut [0.5; 1]);
        assert_eq!(monitor.reading_count(), 1);
    }

    #[test]
    fn test_peak_and_rms() {
        let monitor = LevelMonitor::new();
        let mut meter = LevelMeter::new(1000, monitor.clone());

        // Square wave +-0.5 with one spike
        let mut block: Vec<f32> = (0..500)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        block[10] = -0.9;
        let original = block.clone();
        meter.process(&mut block);

        let reading = monitor.latest().unwrap();
        assert_relative_eq!(reading.peak, 0.9);
        let expected_rms = ((499.0 * 0.25 + 0.81) / 500.0f64).sqrt() as f32;
        assert_relative_eq!(reading.rms, expected_rms, epsilon = 1e-6);
        assert_eq!(block, original);
    }

    #[test]
    fn test_peak_db() {
        let reading = LevelReading { peak: 0.1, rms: 0.05 };
        assert_relative_eq!(reading.peak_db(), -20.0, epsilon = 1e-4);
    }
}
