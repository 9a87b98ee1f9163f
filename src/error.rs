//! Error types for the assistant engine

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Chat backend error
    #[error("chat error: {0}")]
    Chat(String),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio device or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Live session error
    #[error("live session error: {0}")]
    Live(String),

    /// Media capture error (microphone/camera acquisition)
    #[error("media error: {0}")]
    Media(String),

    /// History persistence error
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
