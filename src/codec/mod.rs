//! Frame codec
//!
//! Encodes captured f32 frames to 16-bit little-endian PCM and decodes
//! inbound base64 PCM16 payloads into playable buffers.

pub mod encoder;
pub mod decoder;

pub use encoder::Pcm16Encoder;
pub use decoder::Pcm16Decoder;
