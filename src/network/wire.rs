//! JSON wire format of the live speech API
//!
//! Client → server: `setup`, `realtimeInput`, `toolResponse`.
//! Server → client: `setupComplete`, `serverContent`, `toolCall`, `goAway`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{SessionConfig, ToolDeclaration};
use crate::error::NetworkError;
use crate::protocol::{
    EncodedChunk, FormatDescriptor, InboundPart, Role, ToolInvocation, ToolResponse,
    TransportEvent,
};

// ---------------------------------------------------------------------------
// Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponseMessage),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, NetworkError> {
        serde_json::to_string(self).map_err(|e| NetworkError::SendFailed(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: Map<String, Value>,
    pub output_audio_transcription: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<ToolDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponseMessage {
    pub function_responses: Vec<ToolResponse>,
}

/// Inline binary data, base64 encoded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// Build the handshake message for `config`
pub fn setup_message(config: &SessionConfig) -> ClientMessage {
    let model = if config.model.starts_with("models/") {
        config.model.clone()
    } else {
        format!("models/{}", config.model)
    };

    let tools = if config.tools.is_empty() {
        Vec::new()
    } else {
        vec![ToolSet {
            function_declarations: config.tools.clone(),
        }]
    };

    ClientMessage::Setup(Setup {
        model,
        generation_config: GenerationConfig {
            response_modalities: vec![config.response_modality.wire_name().to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice_name.clone(),
                    },
                },
            },
        },
        system_instruction: config.system_instruction.as_ref().map(|text| Content {
            parts: vec![TextPart { text: text.clone() }],
        }),
        tools,
        input_audio_transcription: Map::new(),
        output_audio_transcription: Map::new(),
    })
}

/// Wrap one encoded capture frame
pub fn audio_message(chunk: &EncodedChunk) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![Blob {
            mime_type: chunk.format.mime_type().to_string(),
            data: STANDARD.encode(&chunk.payload),
        }],
    })
}

pub fn tool_response_message(response: ToolResponse) -> ClientMessage {
    ClientMessage::ToolResponse(ToolResponseMessage {
        function_responses: vec![response],
    })
}

// ---------------------------------------------------------------------------
// Server messages
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCall>,
    go_away: Option<GoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    text: Option<String>,
    inline_data: Option<Blob>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCall {
    #[serde(default)]
    function_calls: Vec<ToolInvocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoAway {
    time_left: Option<String>,
}

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake acknowledged
    SetupComplete,
    /// Ordered events for the controller
    Events(Vec<TransportEvent>),
    /// Server will close soon
    GoAway(Option<String>),
}

/// Parse one server frame into ordered transport events
pub fn parse_server_message(text: &str) -> Result<ServerMessage, NetworkError> {
    let raw: RawServerMessage =
        serde_json::from_str(text).map_err(|e| NetworkError::InvalidMessage(e.to_string()))?;

    if raw.setup_complete.is_some() {
        return Ok(ServerMessage::SetupComplete);
    }
    if let Some(go_away) = raw.go_away {
        return Ok(ServerMessage::GoAway(go_away.time_left));
    }

    let mut events = Vec::new();

    if let Some(content) = raw.server_content {
        let mut parts = Vec::new();

        if let Some(input) = content.input_transcription.filter(|t| !t.text.is_empty()) {
            parts.push(InboundPart::Text {
                text: input.text,
                role: Role::User,
            });
        }
        for part in content.model_turn.map(|turn| turn.parts).unwrap_or_default() {
            if let Some(blob) = part.inline_data {
                parts.push(InboundPart::Audio {
                    format: FormatDescriptor::new(blob.mime_type),
                    data: blob.data,
                });
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                parts.push(InboundPart::Text {
                    text,
                    role: Role::Model,
                });
            }
        }
        if let Some(output) = content.output_transcription.filter(|t| !t.text.is_empty()) {
            parts.push(InboundPart::Text {
                text: output.text,
                role: Role::Model,
            });
        }

        if !parts.is_empty() {
            events.push(TransportEvent::Parts(parts));
        }
        if content.interrupted {
            events.push(TransportEvent::Interrupted);
        }
        if content.turn_complete {
            events.push(TransportEvent::TurnComplete);
        }
    }

    if let Some(call) = raw.tool_call {
        let parts: Vec<InboundPart> = call
            .function_calls
            .into_iter()
            .map(InboundPart::ToolCall)
            .collect();
        if !parts.is_empty() {
            events.push(TransportEvent::Parts(parts));
        }
    }

    Ok(ServerMessage::Events(events))
}
