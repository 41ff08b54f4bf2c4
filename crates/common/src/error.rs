//! Common error types for the signaling protocol.

use thiserror::Error;

/// Errors raised while encoding or decoding signaling frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not a valid protocol message
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame exceeded the configured size limit
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge { size: usize, limit: usize },

    /// Message could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Malformed(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

/// Result type alias using `ProtocolError`
pub type Result<T> = std::result::Result<T, ProtocolError>;
