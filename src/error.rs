//! Error types for the voice session

use thiserror::Error;

/// Main error type for the session controller
#[derive(Error, Debug)]
pub enum Error {
    #[error("Microphone permission denied: {0}")]
    Permission(String),

    #[error("Audio device error: {0}")]
    Device(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection failed: {0}")]
    Connect(NetworkError),

    #[error("Connection error: {0}")]
    Transport(NetworkError),

    #[error("Session was stopped before it connected")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the session.
    ///
    /// Decode failures only cost the offending part; everything else tears
    /// the session down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Codec(_))
    }

    /// True for a denied or unavailable microphone.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::Permission(_))
    }
}

/// Audio subsystem errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to initialize output device: {0}")]
    DeviceInit(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output device already released")]
    Released,
}

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Payload is not valid base64: {0}")]
    InvalidPayload(String),

    #[error("Empty audio payload")]
    EmptyPayload,

    #[error("PCM16 payload has odd length: {0} bytes")]
    OddLength(usize),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Remote closed the connection: {0}")]
    Closed(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
