//! PCM16 encoder
//!
//! Quantizes f32 frames in `[-1.0, 1.0]` to signed 16-bit little-endian PCM.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::buffer::AudioFrame;
use crate::error::CodecError;
use crate::protocol::{EncodedChunk, FormatDescriptor};

/// Convert one sample to PCM16, clamping out-of-range input
#[inline]
pub fn quantize(sample: f32) -> i16 {
    let clamped = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

/// Encoder for outbound capture frames
pub struct Pcm16Encoder {
    sample_rate: u32,
    format: FormatDescriptor,
}

impl Pcm16Encoder {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            format: FormatDescriptor::pcm16(sample_rate),
        }
    }

    /// Encode a frame; the frame must already be at the encoder's rate
    pub fn encode(&mut self, frame: &AudioFrame) -> Result<EncodedChunk, CodecError> {
        if frame.sample_rate != self.sample_rate {
            return Err(CodecError::UnsupportedFormat(format!(
                "frame at {} Hz, encoder expects {} Hz",
                frame.sample_rate, self.sample_rate
            )));
        }

        Ok(EncodedChunk {
            payload: Self::encode_samples(&frame.samples),
            format: self.format.clone(),
        })
    }

    /// Raw sample conversion without framing checks
    pub fn encode_samples(samples: &[f32]) -> Bytes {
        let mut out = BytesMut::with_capacity(samples.len() * 2);
        for &sample in samples {
            out.put_i16_le(quantize(sample));
        }
        out.freeze()
    }

    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encoding_is_little_endian() {
        let mut encoder = Pcm16Encoder::new(16000);
        let frame = AudioFrame::new(vec![0.0, 1.0, -1.0, 0.5], 16000);

        let chunk = encoder.encode(&frame).unwrap();
        assert_eq!(chunk.format.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(chunk.payload.len(), 8);
        assert_eq!(&chunk.payload[0..2], &[0x00, 0x00]);
        assert_eq!(&chunk.payload[2..4], &i16::MAX.to_le_bytes());
        assert_eq!(&chunk.payload[4..6], &i16::MIN.to_le_bytes());
        assert_eq!(i16::from_le_bytes([chunk.payload[6], chunk.payload[7]]), 16383);
    }

    #[test]
    fn test_rejects_wrong_rate() {
        let mut encoder = Pcm16Encoder::new(16000);
        let frame = AudioFrame::new(vec![0.0; 16], 48000);
        assert!(matches!(
            encoder.encode(&frame),
            Err(CodecError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_nan_is_silence() {
        assert_eq!(quantize(f32::NAN), 0);
    }

    proptest! {
        #[test]
        fn quantize_clamps_any_input(sample in proptest::num::f32::ANY) {
            let value = quantize(sample);
            if sample >= 1.0 {
                prop_assert_eq!(value, i16::MAX);
            } else if sample <= -1.0 {
                prop_assert_eq!(value, i16::MIN);
            }
        }

        #[test]
        fn quantize_keeps_sign(sample in -1.0f32..=1.0) {
            let value = quantize(sample);
            prop_assert!(value == 0 || (value > 0) == (sample > 0.0));
        }
    }
}
