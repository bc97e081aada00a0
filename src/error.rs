//! Error types for the talkback client

use thiserror::Error;

/// Result type alias for talkback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the talkback client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat backend error
    #[error("chat error: {0}")]
    Chat(String),

    /// In-flight operation was cancelled by an interrupt.
    /// Expected during barge-in; never surfaced to the user.
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a deliberate cancellation rather than a failure
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
