//! Signaling service error types.
//!
//! Error types map to the numeric `code` carried by the `error` event sent
//! to clients. Internal details are logged server-side but never exposed.

use common::error::ProtocolError;
use thiserror::Error;

/// Signaling service error type.
///
/// Maps to client error codes:
/// - `InvalidMessage`: `BAD_REQUEST` (1)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `RoomNotFound`: `NOT_FOUND` (4)
/// - `Internal`, `RoomClosed`: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`, `RoomFull`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Client frame could not be decoded.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Room is not registered.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room actor dissolved while the request was in flight.
    #[error("Room closed: {0}")]
    RoomClosed(String),

    /// Room already holds its maximum number of members and pending peers.
    #[error("Room full: {0}")]
    RoomFull(String),

    /// Relay instance holds its maximum number of rooms.
    #[error("Relay at capacity")]
    CapacityExceeded,

    /// Relay is shutting down.
    #[error("Relay is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SignalingError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SignalingError::InvalidMessage(_) => 1, // BAD_REQUEST
            SignalingError::PermissionDenied(_) => 3, // FORBIDDEN
            SignalingError::RoomNotFound(_) => 4,   // NOT_FOUND
            SignalingError::RoomClosed(_) | SignalingError::Internal(_) => 6, // INTERNAL_ERROR
            SignalingError::RoomFull(_)
            | SignalingError::CapacityExceeded
            | SignalingError::Draining => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::InvalidMessage(_) => "Malformed or unsupported message".to_string(),
            SignalingError::PermissionDenied(msg) => msg.clone(),
            SignalingError::RoomNotFound(_) => "Room not found".to_string(),
            SignalingError::RoomClosed(_) | SignalingError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            SignalingError::RoomFull(_) => "Room is full".to_string(),
            SignalingError::CapacityExceeded => {
                "Server is at capacity, please try again".to_string()
            }
            SignalingError::Draining => "Server is shutting down, please reconnect".to_string(),
        }
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingError::InvalidMessage(_) => "invalid_message",
            SignalingError::PermissionDenied(_) => "permission_denied",
            SignalingError::RoomNotFound(_) => "room_not_found",
            SignalingError::RoomClosed(_) => "room_closed",
            SignalingError::RoomFull(_) => "room_full",
            SignalingError::CapacityExceeded => "capacity_exceeded",
            SignalingError::Draining => "draining",
            SignalingError::Internal(_) => "internal",
        }
    }
}

impl From<ProtocolError> for SignalingError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Serialization(msg) => SignalingError::Internal(msg),
            other => SignalingError::InvalidMessage(other.to_string()),
        }
    }
}
