//! Error types for the voice conversation front end

use thiserror::Error;

/// Result type alias for emotive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid configuration (credentials, endpoints)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Capture or playback capability not available in this environment
    #[error("unsupported environment: {0}")]
    Environment(String),

    /// Network failure or non-success status from a remote endpoint
    #[error("transport error: {0}")]
    Transport(String),

    /// The model declined to answer (content filter)
    #[error("response refused: {0}")]
    Refused(String),

    /// No speech detected or empty model reply
    #[error("empty result: {0}")]
    EmptyResult(String),

    /// A listening session is already active
    #[error("already listening")]
    AlreadyListening,

    /// The previous turn is still being transcribed or answered
    #[error("busy: {0}")]
    Busy(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this failure happened at the transport level
    ///
    /// Only transport failures qualify for the fallback chat transport.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Http(_))
    }
}
