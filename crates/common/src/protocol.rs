//! JSON signaling protocol spoken over the client WebSocket.
//!
//! Every frame is a single JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`; `data` is omitted for events
//! that carry nothing. Event names are kebab-case and payload fields are
//! camelCase, matching the browser clients.
//!
//! Negotiation payloads (`signal`, `candidate`) are opaque to the relay and
//! carried as raw JSON values.

use crate::error::{ProtocolError, Result};
use crate::types::{ConnectionId, DisplayCode, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Arbitrary status fields broadcast by a peer.
pub type StatusPayload = serde_json::Map<String, Value>;

/// Well-known keys inside a [`StatusPayload`].
pub mod status {
    pub const AUDIO_ON: &str = "audioOn";
    pub const VIDEO_ON: &str = "videoOn";
    pub const SPEAKING: &str = "speaking";
    pub const HAND_RAISED: &str = "handRaised";
    pub const SCREEN_SHARING: &str = "screenSharing";
    /// Only honored when it originates from the room's host.
    pub const RECORDING: &str = "recording";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const CLIENT_CLASS: &str = "clientClass";
}

// ---------------------------------------------------------------------------
// Client -> relay
// ---------------------------------------------------------------------------

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(JoinRoom),
    GivePermission(GivePermission),
    Offer(SignalOffer),
    Answer(SignalAnswer),
    IceCandidate(SignalCandidate),
    BroadcastStatus(BroadcastStatus),
    EndMeeting(RoomRef),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoom {
    pub room_id: RoomId,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub name: String,
}

/// Host decision on a pending joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GivePermission {
    pub peer_id: ConnectionId,
    pub room_id: RoomId,
    pub approved: bool,
}

/// Offer addressed to `target`.
///
/// `caller_id` is advisory; the relay always stamps the real sender.
/// `ice_restart` marks a renegotiation of an existing link rather than a new
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOffer {
    pub target: ConnectionId,
    #[serde(rename = "callerID", default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<ConnectionId>,
    pub signal: Value,
    #[serde(rename = "iceRestart", default, skip_serializing_if = "is_false")]
    pub ice_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAnswer {
    pub target: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    pub signal: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalCandidate {
    pub target: ConnectionId,
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    pub room_id: RoomId,
    pub payload: StatusPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRef {
    pub room_id: RoomId,
}

impl ClientMessage {
    /// Decode a client frame, enforcing `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::FrameTooLarge` for oversized frames and
    /// `ProtocolError::Malformed` for anything that is not a known event.
    pub fn from_frame(frame: &str, max_bytes: usize) -> Result<Self> {
        check_size(frame, max_bytes)?;
        Ok(serde_json::from_str(frame)?)
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Serialization` if the payload cannot be encoded.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Stable label used for logging and metrics.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::GivePermission(_) => "give-permission",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::BroadcastStatus(_) => "broadcast-status",
            Self::EndMeeting(_) => "end-meeting",
        }
    }
}

// ---------------------------------------------------------------------------
// Relay -> client
// ---------------------------------------------------------------------------

/// Events the relay delivers to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Host admitted; carries the room's display code.
    MeetingInfo(MeetingCode),
    WaitingForPermission(MeetingCode),
    PermissionRequested(PermissionRequest),
    PermissionGranted,
    PermissionDenied,
    /// Every other member of the room, in join order.
    AllUsers(Vec<PeerSummary>),
    UserJoined(PeerSummary),
    UserLeft(PeerDeparture),
    Offer(RelayedOffer),
    Answer(RelayedAnswer),
    IceCandidate(RelayedCandidate),
    PeerStatus(PeerStatus),
    MeetingEnded,
    Error(ErrorNotice),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingCode {
    pub meeting_id: DisplayCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub peer_id: ConnectionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: ConnectionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDeparture {
    pub id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedOffer {
    #[serde(rename = "callerID")]
    pub caller_id: ConnectionId,
    pub signal: Value,
    #[serde(rename = "iceRestart", default, skip_serializing_if = "is_false")]
    pub ice_restart: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedAnswer {
    pub id: ConnectionId,
    pub signal: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayedCandidate {
    pub from: ConnectionId,
    pub candidate: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub from: ConnectionId,
    pub payload: StatusPayload,
}

/// Error surfaced to a client. Never carries internal details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: i32,
    pub message: String,
}

impl ServerMessage {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Serialization` if the payload cannot be encoded.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a relay frame, enforcing `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::FrameTooLarge` for oversized frames and
    /// `ProtocolError::Malformed` for anything that is not a known event.
    pub fn from_frame(frame: &str, max_bytes: usize) -> Result<Self> {
        check_size(frame, max_bytes)?;
        Ok(serde_json::from_str(frame)?)
    }

    /// Stable label used for logging and metrics.
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::MeetingInfo(_) => "meeting-info",
            Self::WaitingForPermission(_) => "waiting-for-permission",
            Self::PermissionRequested(_) => "permission-requested",
            Self::PermissionGranted => "permission-granted",
            Self::PermissionDenied => "permission-denied",
            Self::AllUsers(_) => "all-users",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft(_) => "user-left",
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::PeerStatus(_) => "peer-status",
            Self::MeetingEnded => "meeting-ended",
            Self::Error(_) => "error",
        }
    }

    /// Whether this event means the receiver is now a room member.
    #[must_use]
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::MeetingInfo(_) | Self::PermissionGranted | Self::AllUsers(_)
        )
    }
}

fn check_size(frame: &str, limit: usize) -> Result<()> {
    if frame.len() > limit {
        return Err(ProtocolError::FrameTooLarge {
            size: frame.len(),
            limit,
        });
    }
    Ok(())
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}
