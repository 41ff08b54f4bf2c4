//! Negotiation relay.
//!
//! Routes offers, answers and ICE candidates from one connection to another
//! by connection ID. The relay keeps no negotiation state and never looks
//! inside the payloads; it only replaces whatever sender identity the client
//! claimed with the connection the message actually arrived on.

use crate::actors::{ConnectionHandle, Delivery};
use crate::observability::metrics as prom;

use common::protocol::{RelayedAnswer, RelayedCandidate, RelayedOffer, ServerMessage};
use common::types::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Live connections by ID.
///
/// Sessions register on connect and unregister on close.
#[derive(Clone, Debug, Default)]
pub struct ConnectionDirectory {
    connections: Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>,
}

impl ConnectionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection: ConnectionHandle) {
        self.connections
            .write()
            .await
            .insert(connection.connection_id(), connection);
    }

    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.write().await.remove(&connection_id)
    }

    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Offer { ice_restart: bool },
    Answer,
    Candidate,
}

impl NegotiationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NegotiationKind::Offer { .. } => "offer",
            NegotiationKind::Answer => "answer",
            NegotiationKind::Candidate => "ice-candidate",
        }
    }
}

/// One negotiation message in flight between two connections.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationMessage {
    pub kind: NegotiationKind,
    /// Connection the message arrived on.
    pub source_id: ConnectionId,
    pub target_id: ConnectionId,
    /// SDP or ICE candidate, passed through untouched.
    pub payload: Value,
}

impl NegotiationMessage {
    /// The event the target receives, stamped with the true source.
    #[must_use]
    pub fn into_delivery(self) -> ServerMessage {
        match self.kind {
            NegotiationKind::Offer { ice_restart } => ServerMessage::Offer(RelayedOffer {
                caller_id: self.source_id,
                signal: self.payload,
                ice_restart,
            }),
            NegotiationKind::Answer => ServerMessage::Answer(RelayedAnswer {
                id: self.source_id,
                signal: self.payload,
            }),
            NegotiationKind::Candidate => ServerMessage::IceCandidate(RelayedCandidate {
                from: self.source_id,
                candidate: self.payload,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    /// No live connection has the target ID.
    UnknownTarget,
    /// Target mailbox was full or already closed.
    Dropped,
}

/// Stateless router over a [`ConnectionDirectory`].
#[derive(Clone, Debug)]
pub struct Relay {
    directory: ConnectionDirectory,
}

impl Relay {
    #[must_use]
    pub fn new(directory: ConnectionDirectory) -> Self {
        Self { directory }
    }

    #[must_use]
    pub fn directory(&self) -> &ConnectionDirectory {
        &self.directory
    }

    /// Forward `message` to its target.
    ///
    /// Undeliverable messages are logged and counted; the sender is never told.
    pub async fn route(&self, message: NegotiationMessage) -> RelayOutcome {
        let kind = message.kind;
        let source_id = message.source_id;
        let target_id = message.target_id;

        let Some(target) = self.directory.get(target_id).await else {
            debug!(
                target: "sig.relay",
                kind = kind.as_str(),
                source_id = %source_id,
                target_id = %target_id,
                "Negotiation target not connected, dropping"
            );
            prom::record_relay_undeliverable("unknown_target");
            return RelayOutcome::UnknownTarget;
        };

        match target.deliver(message.into_delivery()) {
            Delivery::Delivered => {
                debug!(
                    target: "sig.relay",
                    kind = kind.as_str(),
                    source_id = %source_id,
                    target_id = %target_id,
                    "Negotiation message relayed"
                );
                RelayOutcome::Delivered
            }
            Delivery::Dropped => {
                warn!(
                    target: "sig.relay",
                    kind = kind.as_str(),
                    target_id = %target_id,
                    "Negotiation target mailbox full"
                );
                prom::record_relay_undeliverable("full");
                RelayOutcome::Dropped
            }
            Delivery::Closed => {
                prom::record_relay_undeliverable("closed");
                RelayOutcome::Dropped
            }
        }
    }
}
