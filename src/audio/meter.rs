//! Loudness metering for the volume indicator

use std::sync::atomic::{AtomicU32, Ordering};

/// Compute RMS level of samples (0.0–1.0 range for normalized audio)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Latest capture loudness, written from the audio thread and read by the UI
///
/// Stored as f32 bits so neither side ever blocks.
#[derive(Debug)]
pub struct VolumeMeter {
    level: AtomicU32,
    gain: f32,
}

impl VolumeMeter {
    pub fn new(gain: f32) -> Self {
        Self {
            level: AtomicU32::new(0f32.to_bits()),
            gain,
        }
    }

    /// Record one frame and return the displayed level
    pub fn record(&self, samples: &[f32]) -> f32 {
        let level = (rms(samples) * self.gain).clamp(0.0, 1.0);
        let level = if level.is_nan() { 0.0 } else { level };
        self.level.store(level.to_bits(), Ordering::Relaxed);
        level
    }

    /// Current level in `0.0..=1.0`
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.level.store(0f32.to_bits(), Ordering::Relaxed);
    }
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_VOLUME_GAIN)
    }
}
