//! Error types for voxbridge

use thiserror::Error;

/// Result type alias for voxbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Input device access denied or unavailable
    #[error("permission error: {0}")]
    Permission(String),

    /// Transport to the relay or STT provider could not be opened or dropped mid-session
    #[error("connection error: {0}")]
    Connection(String),

    /// Non-success response from the query or synthesis backend
    #[error("backend error: {0}")]
    Backend(String),

    /// Malformed audio or transcript payload
    #[error("decode error: {0}")]
    Decode(String),

    /// A downstream call exceeded its time bound
    #[error("timeout: {0}")]
    Timeout(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
