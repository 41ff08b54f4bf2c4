//! Scripted signaling connector for mesh session tests.
//!
//! Each call to [`MockConnector::accept_next`] prepares one connection and
//! returns the relay's end of it. `connect()` hands prepared connections out
//! in order and refuses once none are left, which is how tests drive the
//! reconnect path.

use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use mesh_client::errors::ClientError;
use mesh_client::signaling::{SignalingChannel, SignalingConnector};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

const CHANNEL_BUFFER: usize = 64;
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// The relay side of one mock connection.
#[derive(Debug)]
pub struct RelayEnd {
    from_client: mpsc::Receiver<ClientMessage>,
    to_client: mpsc::Sender<ServerMessage>,
}

impl RelayEnd {
    /// Next message from the client; panics after a timeout.
    pub async fn recv(&mut self) -> ClientMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.from_client.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("Client dropped the signaling channel"),
            Err(_) => panic!("Timed out waiting for a client message"),
        }
    }

    /// Messages the client has sent so far.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.from_client.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub async fn send(&self, message: ServerMessage) {
        self.to_client
            .send(message)
            .await
            .expect("Client dropped the signaling channel");
    }

    /// Drop the connection as a network failure would.
    pub fn disconnect(self) {}
}

/// [`SignalingConnector`] backed by prepared in-memory connections.
#[derive(Debug, Default)]
pub struct MockConnector {
    prepared: Mutex<VecDeque<SignalingChannel>>,
    attempts: AtomicU32,
}

impl MockConnector {
    #[must_use]
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    /// Prepare the next connection `connect()` will return.
    pub fn accept_next(&self) -> RelayEnd {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_BUFFER);
        self.prepared
            .lock()
            .unwrap()
            .push_back(SignalingChannel::new(outbound_tx, inbound_rx));
        RelayEnd {
            from_client: outbound_rx,
            to_client: inbound_tx,
        }
    }

    /// Number of `connect()` calls so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingConnector for MockConnector {
    async fn connect(&self) -> Result<SignalingChannel, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.prepared
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ClientError::Transport("connection refused".to_string()))
    }
}
