//! Processing stages of the preprocessing chain
//!
//! Each stage processes a mono block in place. Stages keep only their own
//! filter/envelope state and are released as a unit with the chain.

/// One node of the preprocessing chain
pub trait Stage: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Process a block of mono samples in place
    fn process(&mut self, block: &mut [f32]);
}

/// Convert a time constant to a one-pole smoothing coefficient
pub(crate) fn time_to_coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = time_ms * sample_rate as f32 / 1000.0;
    if samples <= 0.0 {
        return 0.0;
    }
    (-1.0 / samples).exp()
}

pub(crate) fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Second-order low-pass filter (RBJ cookbook biquad)
#[derive(Debug, Clone)]
pub struct LowPass {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl LowPass {
    pub fn new(sample_rate: u32, cutoff_hz: f32, q: f32) -> Self {
        let nyquist = sample_rate as f64 / 2.0;
        let cutoff = (cutoff_hz as f64).clamp(1.0, nyquist * 0.99);
        let w0 = 2.0 * std::f64::consts::PI * cutoff / sample_rate as f64;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q.max(0.01) as f64);

        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }
}

impl Stage for LowPass {
    fn name(&self) -> &'static str {
        "low-pass"
    }

    fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            let x = *sample as f64;
            let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
                - self.a1 * self.y1
                - self.a2 * self.y2;
            self.x2 = self.x1;
            self.x1 = x;
            self.y2 = self.y1;
            self.y1 = y;
            *sample = y as f32;
        }
    }
}

/// Feed-forward dynamic-range compressor with a soft knee
///
/// Brings quiet and loud hits to comparable amplitude so the tempo engine
/// sees consistent onsets regardless of playback volume.
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current smoothed gain (always <= 0 dB)
    gain_db: f32,
}

impl Compressor {
    pub fn new(
        sample_rate: u32,
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_ms: f32,
        release_ms: f32,
    ) -> Self {
        Self {
            threshold_db,
            knee_db: knee_db.max(0.0),
            ratio: ratio.max(1.0),
            attack_coeff: time_to_coeff(attack_ms, sample_rate),
            release_coeff: time_to_coeff(release_ms, sample_rate),
            gain_db: 0.0,
        }
    }

    /// Current gain reduction in dB (positive when compressing)
    pub fn gain_reduction_db(&self) -> f32 {
        -self.gain_db
    }

    /// Static output level for an input level
    fn curve(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if 2.0 * over < -self.knee_db {
            level_db
        } else if self.knee_db > 0.0 && 2.0 * over.abs() <= self.knee_db {
            let x = over + self.knee_db / 2.0;
            level_db + (1.0 / self.ratio - 1.0) * x * x / (2.0 * self.knee_db)
        } else {
            self.threshold_db + over / self.ratio
        }
    }
}

impl Stage for Compressor {
    fn name(&self) -> &'static str {
        "compressor"
    }

    fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            let level_db = 20.0 * sample.abs().max(1e-6).log10();
            let target = self.curve(level_db) - level_db;
            let coeff = if target < self.gain_db {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain_db = coeff * self.gain_db + (1.0 - coeff) * target;
            *sample *= db_to_linear(self.gain_db);
        }
    }
}

/// Fixed makeup gain after the compressor
#[derive(Debug, Clone)]
pub struct MakeupGain {
    gain: f32,
}

impl MakeupGain {
    pub fn from_db(db: f32) -> Self {
        Self {
            gain: db_to_linear(db),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Stage for MakeupGain {
    fn name(&self) -> &'static str {
        "makeup-gain"
    }

    fn process(&mut self, block: &mut [f32]) {
        for sample in block.iter_mut() {
            *sample *= self.gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const RATE: u32 = 48000;

    fn sine(freq: f32, amplitude: f32, seconds: f32) -> Vec<f32> {
        let n = (RATE as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin()
            })
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// Output/input RMS ratio over the second half (after settling)
    fn settled_ratio(stage: &mut dyn Stage, input: &[f32]) -> f32 {
        let mut output = input.to_vec();
        stage.process(&mut output);
        let half = input.len() / 2;
        rms(&output[half..]) / rms(&input[half..])
    }

    #[test]
    fn test_low_pass_attenuates_high_frequencies() {
        let mut filter = LowPass::new(RATE, 150.0, 1.0);
        let ratio = settled_ratio(&mut filter, &sine(1000.0, 0.5, 1.0));
        assert!(ratio < 0.05, "1kHz ratio {}", ratio);
    }

    #[test]
    fn test_low_pass_passes_kick_range() {
        let mut filter = LowPass::new(RATE, 150.0, 1.0);
        let ratio = settled_ratio(&mut filter, &sine(50.0, 0.5, 1.0));
        assert!((0.9..1.2).contains(&ratio), "50Hz ratio {}", ratio);
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let mut comp = Compressor::new(RATE, -30.0, 10.0, 8.0, 3.0, 100.0);
        let mut block = sine(60.0, 1.0, 1.0);
        comp.process(&mut block);

        let tail = &block[block.len() * 9 / 10..];
        let peak = tail.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(peak < 0.5, "peak {}", peak);
        assert!(comp.gain_reduction_db() > 6.0);
    }

    #[test]
    fn test_compressor_leaves_quiet_signal_alone() {
        let mut comp = Compressor::new(RATE, -30.0, 10.0, 8.0, 3.0, 100.0);
        let input = sine(60.0, 0.01, 0.5);
        let mut output = input.clone();
        comp.process(&mut output);

        for (a, b) in input.iter().zip(&output) {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
        assert_relative_eq!(comp.gain_reduction_db(), 0.0);
    }

    #[test]
    fn test_compressor_curve_is_continuous_at_knee_edges() {
        let comp = Compressor::new(RATE, -30.0, 10.0, 8.0, 3.0, 100.0);
        assert_relative_eq!(comp.curve(-35.0), -35.0, epsilon = 1e-4);
        assert_relative_eq!(comp.curve(-25.0), -30.0 + 5.0 / 8.0, epsilon = 1e-4);
        assert_relative_eq!(comp.curve(0.0), -30.0 + 30.0 / 8.0, epsilon = 1e-4);
    }

    #[test]
    fn test_makeup_gain() {
        let mut gain = MakeupGain::from_db(6.0);
        let mut block = vec![0.25f32; 4];
        gain.process(&mut block);
        assert_relative_eq!(block[0], 0.25 * 1.995_262, epsilon = 1e-4);
        assert_relative_eq!(MakeupGain::from_db(0.0).gain(), 1.0);
    }
}
