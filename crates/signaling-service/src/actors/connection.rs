//! Outbound side of one client connection.
//!
//! A `ConnectionHandle` is the only way the rest of the relay talks to a
//! client. It wraps a bounded mailbox drained by that client's WebSocket
//! session. Delivery never waits: when the mailbox is full the message is
//! dropped and counted, so one slow client cannot stall a room actor or the
//! relay. A client that missed a message no longer has a true picture of its
//! rooms, so overflow also closes the connection; the client reconnects and
//! rejoins from a fresh `all-users`.

use super::metrics::ActorMetrics;

use common::protocol::ServerMessage;
use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Mailbox full; message dropped and the connection closed.
    Dropped,
    /// Session already gone.
    Closed,
}

/// Handle to a client's outbound mailbox.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    sender: mpsc::Sender<ServerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its session drains.
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        buffer: usize,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            Self {
                connection_id,
                sender,
                cancel_token,
                metrics,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue a message for the client without waiting.
    pub fn deliver(&self, message: ServerMessage) -> Delivery {
        let message_type = message.message_type();
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "sig.connection",
                    connection_id = %self.connection_id,
                    message_type,
                    "Outbound mailbox full, dropping message and closing connection"
                );
                self.metrics.record_outbound_dropped("full");
                self.cancel_token.cancel();
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "sig.connection",
                    connection_id = %self.connection_id,
                    message_type,
                    "Outbound mailbox closed, connection is gone"
                );
                self.metrics.record_outbound_dropped("closed");
                Delivery::Closed
            }
        }
    }

    /// Ask the session to close its socket.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
