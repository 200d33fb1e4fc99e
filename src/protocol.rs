//! Data model shared by the capture pipeline, the transport and the caller

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NetworkError;

/// MIME-style descriptor carried next to every audio payload,
/// e.g. `audio/pcm;rate=16000`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatDescriptor(String);

impl FormatDescriptor {
    /// Descriptor for 16-bit little-endian mono PCM at `sample_rate`
    pub fn pcm16(sample_rate: u32) -> Self {
        Self(format!("audio/pcm;rate={}", sample_rate))
    }

    pub fn new(mime_type: impl Into<String>) -> Self {
        Self(mime_type.into())
    }

    pub fn mime_type(&self) -> &str {
        &self.0
    }

    /// Whether the descriptor names linear PCM
    pub fn is_pcm(&self) -> bool {
        let base = self.0.split(';').next().unwrap_or_default().trim();
        base.eq_ignore_ascii_case("audio/pcm") || base.eq_ignore_ascii_case("audio/l16")
    }

    /// Sample rate from the `rate=` parameter, if present
    pub fn sample_rate(&self) -> Option<u32> {
        self.0
            .split(';')
            .skip(1)
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.trim().parse().ok())
    }
}

impl std::fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One encoded capture frame, ready for the transport
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Raw PCM16 little-endian bytes
    pub payload: Bytes,
    pub format: FormatDescriptor,
}

/// Who produced a piece of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A function call requested by the remote model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Remote call id, echoed back in the matching [`ToolResponse`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Result of a tool call, returned to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

impl ToolResponse {
    /// Answer `invocation` with `response`
    pub fn for_invocation(invocation: &ToolInvocation, response: Value) -> Self {
        Self {
            id: invocation.id.clone(),
            name: invocation.name.clone(),
            response,
        }
    }
}

/// Text surfaced to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEvent {
    pub text: String,
    pub role: Role,
    pub received_at: DateTime<Utc>,
}

impl TranscriptEvent {
    pub fn new(text: impl Into<String>, role: Role) -> Self {
        Self {
            text: text.into(),
            role,
            received_at: Utc::now(),
        }
    }
}

/// One sub-part of an inbound message, processed in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPart {
    /// Encoded (base64) audio payload with its descriptor
    Audio { format: FormatDescriptor, data: String },
    Text { text: String, role: Role },
    ToolCall(ToolInvocation),
}

/// Events a transport delivers, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One inbound message; its parts are processed in order
    Parts(Vec<InboundPart>),
    /// The model abandoned its current response (barge-in)
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The remote side closed the connection
    Closed(String),
    /// The connection failed after it was established
    Error(NetworkError),
}

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}
