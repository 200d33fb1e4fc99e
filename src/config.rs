//! Configuration for the session, the audio pipelines and the transport
//!
//! Loaded from a TOML file; every section falls back to its defaults.
//!
//! ```toml
//! [session]
//! model = "models/gemini-2.0-flash-live-001"
//! voice_name = "Puck"
//! system_instruction = "You are a friendly tutor."
//!
//! [[session.tools]]
//! name = "lookup_word"
//! description = "Look up a dictionary entry"
//!
//! [audio]
//! frame_size = 4096
//!
//! [transport]
//! api_key_env = "GEMINI_API_KEY"
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_FRAME_SIZE, DEFAULT_VOLUME_GAIN, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
use crate::error::{Error, Result};

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the per-user config file if it exists,
    /// or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Write configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Per-user config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "live-voice-session")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.audio.validate()
    }
}

/// What the remote model should answer with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
    Text,
}

impl ResponseModality {
    /// Name used on the wire
    pub fn wire_name(&self) -> &'static str {
        match self {
            ResponseModality::Audio => "AUDIO",
            ResponseModality::Text => "TEXT",
        }
    }
}

/// A function the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Per-session start configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::Config("session.model must not be empty".into()));
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return Err(Error::Config(format!(
                "tool declaration without a name: {:?}",
                tool.description
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "models/gemini-2.0-flash-live-001".to_string(),
            response_modality: ResponseModality::Audio,
            voice_name: "Puck".to_string(),
            system_instruction: None,
            tools: Vec::new(),
        }
    }
}

/// Capture and playback formats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate frames are sent at
    pub input_sample_rate: u32,
    /// Samples per captured frame
    pub frame_size: usize,
    /// Rate inbound audio is decoded to
    pub output_sample_rate: u32,
    /// RMS to 0..1 volume multiplier (display only)
    pub volume_gain: f32,
}

impl AudioConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(Error::Config("sample rates must be non-zero".into()));
        }
        if self.frame_size == 0 {
            return Err(Error::Config("audio.frame_size must be non-zero".into()));
        }
        if !(self.volume_gain.is_finite() && self.volume_gain > 0.0) {
            return Err(Error::Config("audio.volume_gain must be positive".into()));
        }
        Ok(())
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: INPUT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            volume_gain: DEFAULT_VOLUME_GAIN,
        }
    }
}

/// Remote endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the live API
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
        }
    }
}
