//! Mesh client error types.

use common::error::ProtocolError;
use thiserror::Error;

/// Mesh client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Signaling socket could not be opened or was lost.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Frame from the relay could not be decoded or a message could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Camera, microphone or screen capture is not available.
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// A peer link rejected an operation (bad SDP, closed link).
    #[error("Link error: {0}")]
    Link(String),

    /// The relay could not be reached again after a transport drop.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The session task is gone.
    #[error("Session closed")]
    SessionClosed,
}

impl ClientError {
    /// Whether the session can keep running after this error.
    ///
    /// Link and media failures only affect one peer; transport and protocol
    /// failures require a reconnect.
    #[must_use]
    pub fn is_peer_local(&self) -> bool {
        matches!(self, ClientError::MediaUnavailable(_) | ClientError::Link(_))
    }
}
