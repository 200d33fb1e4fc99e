//! Audio frames, playback buffers and fixed-size framing
//!
//! Capture devices deliver callbacks of arbitrary length at their native
//! rate and channel count. [`FrameAssembler`] turns that into mono frames of
//! exactly `frame_size` samples at the send rate.

use std::sync::Arc;

/// Mono frame of f32 samples
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    /// Rate the samples are at
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get frame duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decoded mono audio ready to be scheduled on the output device
///
/// Samples are shared so the output callback can hold them without copying.
#[derive(Clone, Debug)]
pub struct PlaybackBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Silent buffer of the given length, mostly useful in tests
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let len = (duration_secs * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn shared_samples(&self) -> Arc<[f32]> {
        self.samples.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Linear interpolation resampling for mono audio
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || samples.is_empty() || source_rate == 0 {
        return samples.to_vec();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_count = (samples.len() as f64 * ratio) as usize;
    let mut output = vec![0.0f32; output_count];

    for (i, sample) in output.iter_mut().enumerate() {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        if index + 1 < samples.len() {
            *sample = samples[index] * (1.0 - fraction) + samples[index + 1] * fraction;
        } else if index < samples.len() {
            *sample = samples[index];
        }
    }
    output
}

/// Average interleaved channels down to mono
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Accumulates device callbacks into fixed-size mono frames
pub struct FrameAssembler {
    frame_size: usize,
    target_rate: u32,
    pending: Vec<f32>,
    frames_emitted: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, target_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            target_rate,
            pending: Vec::with_capacity(frame_size * 2),
            frames_emitted: 0,
        }
    }

    /// Feed one device callback; returns every frame it completed
    pub fn push(&mut self, samples: &[f32], channels: u16, source_rate: u32) -> Vec<AudioFrame> {
        let mono = downmix(samples, channels);
        let converted = resample(&mono, source_rate, self.target_rate);
        self.pending.extend_from_slice(&converted);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let samples: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            frames.push(AudioFrame::new(samples, self.target_rate));
        }
        self.frames_emitted += frames.len() as u64;
        frames
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}
