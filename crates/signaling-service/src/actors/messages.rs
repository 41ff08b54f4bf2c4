//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing via `tokio::sync::mpsc`.
//! Response patterns use `tokio::sync::oneshot` for request-reply semantics.

use crate::errors::SignalingError;

use super::connection::ConnectionHandle;
use super::room::RoomActorHandle;

use common::protocol::{PeerSummary, StatusPayload};
use common::types::{ConnectionId, DisplayCode, RoomId};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the live room actor for `room_id`, spawning one if needed.
    GetOrCreateRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, SignalingError>>,
    },

    /// Look up an existing room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomEntry, SignalingError>>,
    },

    /// Map a display code back to its room, if that room is still active.
    ResolveDisplayCode {
        code: String,
        respond_to: oneshot::Sender<Option<RoomId>>,
    },

    /// Snapshot of every registered room (for diagnostics).
    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomEntry>>,
    },

    /// A room actor emptied out and stopped.
    ///
    /// `instance` guards against a late notice removing a newer room that
    /// reused the same `room_id`.
    RoomClosed { room_id: RoomId, instance: Uuid },

    /// Get current registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Initiate graceful shutdown (SIGTERM received).
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },
}

/// Registry view of one room.
#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub room_id: RoomId,
    pub display_code: DisplayCode,
    /// Unique per room actor, never reused.
    pub instance: Uuid,
    /// Unix seconds.
    pub created_at: i64,
    pub handle: RoomActorHandle,
}

/// Registry status.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A connection wants to enter the room.
    Join {
        connection: ConnectionHandle,
        name: String,
        /// Whether the client claims host authority.
        is_host: bool,
        respond_to: oneshot::Sender<Result<Admission, SignalingError>>,
    },

    /// Host approves or rejects a pending peer.
    Decide {
        host_id: ConnectionId,
        target_id: ConnectionId,
        approved: bool,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// Fan out a status update to every other member.
    BroadcastStatus {
        source_id: ConnectionId,
        payload: StatusPayload,
        /// Number of members the update was queued for.
        respond_to: oneshot::Sender<Result<usize, SignalingError>>,
    },

    /// Host ends the meeting for everyone.
    EndMeeting {
        requester: ConnectionId,
        respond_to: oneshot::Sender<Result<(), SignalingError>>,
    },

    /// A connection dropped; remove it from the room.
    ConnectionDisconnected {
        connection_id: ConnectionId,
        /// Fires after the removal (and dissolution, if the room emptied).
        respond_to: oneshot::Sender<()>,
    },

    /// Get current room state (for debugging/health).
    GetState {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// How a join request was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Entered as host and received the member list.
    Host,
    /// Already a member; the member list was sent again.
    Member,
    /// Waiting for the host's decision.
    Pending,
    /// Previously rejected by the host.
    Denied,
}

impl Admission {
    /// Label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Admission::Host => "host",
            Admission::Member => "member",
            Admission::Pending => "pending",
            Admission::Denied => "denied",
        }
    }
}

/// Point-in-time view of a room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub display_code: DisplayCode,
    pub host_id: Option<ConnectionId>,
    /// Members in join order.
    pub members: Vec<PeerSummary>,
    /// Pending peers in request order.
    pub pending: Vec<PeerSummary>,
    pub denied_count: usize,
}

impl RoomSnapshot {
    #[must_use]
    pub fn is_member(&self, id: ConnectionId) -> bool {
        self.members.iter().any(|peer| peer.id == id)
    }

    #[must_use]
    pub fn is_pending(&self, id: ConnectionId) -> bool {
        self.pending.iter().any(|peer| peer.id == id)
    }
}
