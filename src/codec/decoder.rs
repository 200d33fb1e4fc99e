//! PCM16 decoder
//!
//! Turns inbound audio parts (base64 text carrying 16-bit little-endian mono
//! PCM) into playable f32 buffers at the fixed output rate.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::audio::buffer::{resample, PlaybackBuffer};
use crate::error::CodecError;
use crate::protocol::FormatDescriptor;

/// Decoder for inbound audio parts
pub struct Pcm16Decoder {
    output_rate: u32,
    /// Parts decoded
    parts_decoded: u64,
    /// Parts rejected
    parts_failed: u64,
}

impl Pcm16Decoder {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate,
            parts_decoded: 0,
            parts_failed: 0,
        }
    }

    /// Decode one base64 payload described by `format`
    pub fn decode(
        &mut self,
        format: &FormatDescriptor,
        data: &str,
    ) -> Result<PlaybackBuffer, CodecError> {
        let result = self.decode_inner(format, data);
        match &result {
            Ok(_) => self.parts_decoded += 1,
            Err(_) => self.parts_failed += 1,
        }
        result
    }

    fn decode_inner(
        &self,
        format: &FormatDescriptor,
        data: &str,
    ) -> Result<PlaybackBuffer, CodecError> {
        if !format.is_pcm() {
            return Err(CodecError::UnsupportedFormat(format.to_string()));
        }

        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| CodecError::InvalidPayload(e.to_string()))?;

        let source_rate = format.sample_rate().unwrap_or(self.output_rate);
        self.decode_pcm(&bytes, source_rate)
    }

    /// Decode raw PCM16 bytes recorded at `source_rate`
    pub fn decode_pcm(&self, bytes: &[u8], source_rate: u32) -> Result<PlaybackBuffer, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        if bytes.len() % 2 != 0 {
            return Err(CodecError::OddLength(bytes.len()));
        }
        if source_rate == 0 {
            return Err(CodecError::UnsupportedFormat("rate=0".into()));
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();

        let samples = if source_rate == self.output_rate {
            samples
        } else {
            resample(&samples, source_rate, self.output_rate)
        };

        Ok(PlaybackBuffer::new(samples, self.output_rate))
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            parts_decoded: self.parts_decoded,
            parts_failed: self.parts_failed,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub parts_decoded: u64,
    pub parts_failed: u64,
}
