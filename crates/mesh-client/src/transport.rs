//! Media transport seam.
//!
//! The mesh drives negotiation through [`MediaTransport`] and [`PeerLink`]
//! without knowing which WebRTC stack sits behind them. Offers and answers
//! are returned directly; everything the link produces on its own (local
//! ICE candidates, the remote stream, connection state changes) is pushed
//! through a [`LinkEventSink`] tagged with the link's generation.

use crate::errors::ClientError;
use crate::peer::Role;

use async_trait::async_trait;
use common::types::ConnectionId;
use serde_json::Value;
use tokio::sync::mpsc;

/// Local video source attached to every link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoSource {
    #[default]
    Camera,
    Screen,
    /// Video muted; audio only.
    None,
}

/// Connection state reported by a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A local ICE candidate to relay to the remote peer.
    LocalCandidate(Value),
    /// The remote peer's media stream arrived.
    RemoteStream,
    StateChanged(LinkState),
}

/// A [`LinkEvent`] tagged with the link that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedLinkEvent {
    pub peer_id: ConnectionId,
    pub generation: u64,
    pub event: LinkEvent,
}

/// Where a link reports its events.
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    peer_id: ConnectionId,
    generation: u64,
    sender: mpsc::Sender<TaggedLinkEvent>,
}

impl LinkEventSink {
    #[must_use]
    pub fn new(
        peer_id: ConnectionId,
        generation: u64,
        sender: mpsc::Sender<TaggedLinkEvent>,
    ) -> Self {
        Self {
            peer_id,
            generation,
            sender,
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> ConnectionId {
        self.peer_id
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report `event`. Returns `false` if the mesh is gone or its queue is full.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.sender
            .try_send(TaggedLinkEvent {
                peer_id: self.peer_id,
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// One media connection to one remote peer.
#[async_trait]
pub trait PeerLink: Send {
    /// Produce an offer. `ice_restart` requests fresh ICE credentials.
    async fn create_offer(&mut self, ice_restart: bool) -> Result<Value, ClientError>;

    /// Apply the remote offer and produce our answer.
    async fn accept_offer(&mut self, offer: Value) -> Result<Value, ClientError>;

    /// Apply the remote answer to the offer we sent.
    async fn accept_answer(&mut self, answer: Value) -> Result<(), ClientError>;

    async fn add_candidate(&mut self, candidate: Value) -> Result<(), ClientError>;

    /// Swap the outgoing video track without renegotiating.
    async fn replace_video(&mut self, source: VideoSource) -> Result<(), ClientError>;

    /// Release the connection. Called exactly once per link.
    async fn close(&mut self);
}

/// Factory for [`PeerLink`]s.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Create a link to `peer_id` carrying the given local video source.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::MediaUnavailable` if local capture cannot start.
    async fn create_link(
        &self,
        peer_id: ConnectionId,
        role: Role,
        video: VideoSource,
        events: LinkEventSink,
    ) -> Result<Box<dyn PeerLink>, ClientError>;
}
