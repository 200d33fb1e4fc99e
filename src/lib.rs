//! # Live Voice Session
//!
//! Real-time duplex voice conversation with a remote speech model.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        VoiceSession (session::controller)                │
//! │           one dispatch loop: (state × event) → transition + effects      │
//! │                                                                          │
//! │  CAPTURE (platform audio thread)                                         │
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────┐   ┌───────────────┐   │
//! │  │ Microphone │──▶│FrameAssembler│──▶│  Volume   │──▶│  FrameGate    │   │
//! │  │  (cpal)    │   │ 4096 @ 16kHz │   │  Meter    │   │ empty until   │   │
//! │  └────────────┘   └──────────────┘   └───────────┘   │ Connected     │   │
//! │                                                      └──────┬────────┘   │
//! │                                                             ▼            │
//! │                                    ┌───────────────┐   ┌────────────┐    │
//! │                                    │ Pcm16Encoder  │──▶│ Transport  │──▶ remote
//! │                                    └───────────────┘   │   send()   │    │
//! │                                                        └────────────┘    │
//! │  RECEIVE (dispatch loop)                                                 │
//! │  ┌────────────┐   ┌───────────────┐   ┌───────────────────┐              │
//! │  │ Transport  │──▶│ Pcm16Decoder  │──▶│ PlaybackScheduler │──▶ speaker   │
//! │  │  events    │   │ base64 → f32  │   │ cursor + live set │   (cpal)     │
//! │  └─────┬──────┘   └───────────────┘   └─────────▲─────────┘              │
//! │        │ interrupted                            │ cancel_all             │
//! │        └────────────────────────────────────────┘                        │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use config::{AppConfig, AudioConfig, SessionConfig, TransportConfig};
pub use error::{Error, Result};
pub use protocol::{ConnectionState, Role, ToolInvocation, ToolResponse, TranscriptEvent};
pub use session::{SessionDelegate, SessionStats, VoiceSession};

/// Application-wide constants
pub mod constants {
    /// Rate captured audio is sent at
    pub const INPUT_SAMPLE_RATE: u32 = 16_000;

    /// Rate inbound model audio is delivered at
    pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

    /// Samples per captured frame
    pub const DEFAULT_FRAME_SIZE: usize = 4096;

    /// RMS multiplier for the 0..1 volume indicator
    pub const DEFAULT_VOLUME_GAIN: f32 = 5.0;

    /// Queue depth for buffers waiting to enter the output callback
    pub const OUTPUT_COMMAND_CAPACITY: usize = 256;

    /// Messages waiting for the WebSocket writer; audio beyond this is dropped
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;
}
