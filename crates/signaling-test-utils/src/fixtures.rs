//! In-process relay fixtures.
//!
//! `TestRelay` wires a registry, a connection directory and a relay the same
//! way `main.rs` does, with small limits. `TestClient` is one relay-side
//! session driven directly with protocol messages, so admission and relay
//! behavior can be tested without sockets. `TestRelay::serve` binds the real
//! WebSocket server on an ephemeral port for end-to-end tests.

use common::protocol::{
    BroadcastStatus, ClientMessage, GivePermission, JoinRoom, RoomRef, ServerMessage,
    SignalAnswer, SignalCandidate, SignalOffer, StatusPayload,
};
use common::types::{ConnectionId, RoomId};
use serde_json::Value;
use signaling_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use signaling_service::relay::{ConnectionDirectory, Relay};
use signaling_service::server::{self, AppState};
use signaling_service::session::{ClientSession, SessionContext, SessionSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long `TestClient::recv` waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Builder for [`TestRelay`].
#[derive(Debug, Clone)]
pub struct TestRelayBuilder {
    max_rooms: usize,
    max_room_members: usize,
    outbound_buffer: usize,
    max_frame_bytes: usize,
}

impl Default for TestRelayBuilder {
    fn default() -> Self {
        Self {
            max_rooms: 16,
            max_room_members: 16,
            outbound_buffer: 64,
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl TestRelayBuilder {
    #[must_use]
    pub fn max_rooms(mut self, max: usize) -> Self {
        self.max_rooms = max;
        self
    }

    #[must_use]
    pub fn max_room_members(mut self, max: usize) -> Self {
        self.max_room_members = max;
        self
    }

    #[must_use]
    pub fn outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer;
        self
    }

    #[must_use]
    pub fn build(self) -> TestRelay {
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(
            format!("sig-test-{}", ConnectionId::new()),
            RegistrySettings {
                max_rooms: self.max_rooms,
                max_room_members: self.max_room_members,
            },
            Arc::clone(&metrics),
        );
        let shutdown = registry.child_token();
        TestRelay {
            context: SessionContext {
                registry,
                relay: Relay::new(ConnectionDirectory::new()),
                metrics,
                settings: SessionSettings {
                    outbound_buffer: self.outbound_buffer,
                    max_frame_bytes: self.max_frame_bytes,
                },
            },
            shutdown,
        }
    }
}

/// A complete relay running inside the test process.
#[derive(Debug, Clone)]
pub struct TestRelay {
    pub context: SessionContext,
    shutdown: CancellationToken,
}

impl Default for TestRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRelay {
    #[must_use]
    pub fn new() -> Self {
        TestRelayBuilder::default().build()
    }

    #[must_use]
    pub fn builder() -> TestRelayBuilder {
        TestRelayBuilder::default()
    }

    #[must_use]
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.context.registry
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.context.metrics
    }

    /// Open a new relay-side session.
    pub async fn client(&self) -> TestClient {
        let (session, outbound) =
            ClientSession::open(self.context.clone(), self.shutdown.child_token()).await;
        TestClient { session, outbound }
    }

    /// Serve the WebSocket endpoint on an ephemeral loopback port.
    ///
    /// Returns the `ws://` URL of `/ws`.
    pub async fn serve(&self) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr: SocketAddr = listener.local_addr().expect("Listener has no address");
        let state = AppState {
            context: self.context.clone(),
            shutdown: self.shutdown.clone(),
        };
        tokio::spawn(async move {
            let _ = server::serve(listener, state).await;
        });
        format!("ws://{addr}/ws")
    }

    /// Stop the server, every session and the registry.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.context.registry.cancel();
    }
}

/// One connection to a [`TestRelay`], driven directly with protocol messages.
#[derive(Debug)]
pub struct TestClient {
    session: ClientSession,
    outbound: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.session.connection_id()
    }

    /// Whether the relay asked this connection's socket to close.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.session.cancel_token().is_cancelled()
    }

    /// Send `message` through the same decode path a socket frame takes.
    pub async fn send(&mut self, message: ClientMessage) {
        let frame = message.to_frame().expect("Failed to encode client message");
        self.session.handle_frame(&frame).await;
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, frame: &str) {
        self.session.handle_frame(frame).await;
    }

    pub async fn join(&mut self, room: &str, name: &str, is_host: bool) {
        self.send(ClientMessage::JoinRoom(JoinRoom {
            room_id: RoomId::from(room),
            is_host,
            name: name.to_string(),
        }))
        .await;
    }

    pub async fn decide(&mut self, room: &str, peer_id: ConnectionId, approved: bool) {
        self.send(ClientMessage::GivePermission(GivePermission {
            peer_id,
            room_id: RoomId::from(room),
            approved,
        }))
        .await;
    }

    pub async fn offer(&mut self, target: ConnectionId, signal: Value) {
        self.send(ClientMessage::Offer(SignalOffer {
            target,
            caller_id: None,
            signal,
            ice_restart: false,
        }))
        .await;
    }

    pub async fn answer(&mut self, target: ConnectionId, signal: Value) {
        self.send(ClientMessage::Answer(SignalAnswer {
            target,
            id: None,
            signal,
        }))
        .await;
    }

    pub async fn candidate(&mut self, target: ConnectionId, candidate: Value) {
        self.send(ClientMessage::IceCandidate(SignalCandidate { target, candidate }))
            .await;
    }

    pub async fn broadcast(&mut self, room: &str, payload: StatusPayload) {
        self.send(ClientMessage::BroadcastStatus(BroadcastStatus {
            room_id: RoomId::from(room),
            payload,
        }))
        .await;
    }

    pub async fn end_meeting(&mut self, room: &str) {
        self.send(ClientMessage::EndMeeting(RoomRef {
            room_id: RoomId::from(room),
        }))
        .await;
    }

    /// Next delivered event; panics after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> ServerMessage {
        match tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv()).await {
            Ok(Some(message)) => message,
            Ok(None) => panic!("Connection {} mailbox closed", self.id()),
            Err(_) => panic!("Timed out waiting for an event on {}", self.id()),
        }
    }

    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Panic if anything was delivered.
    pub fn assert_idle(&mut self) {
        let pending = self.drain();
        assert!(
            pending.is_empty(),
            "Connection {} expected no events, got {pending:?}",
            self.id()
        );
    }

    /// Drop the connection, running the relay's disconnect cleanup.
    pub async fn close(self) {
        self.session.close().await;
    }
}

/// Members listed in an `all-users` event.
#[must_use]
pub fn all_users_ids(message: &ServerMessage) -> Vec<ConnectionId> {
    match message {
        ServerMessage::AllUsers(peers) => peers.iter().map(|peer| peer.id).collect(),
        other => panic!("Expected all-users, got {other:?}"),
    }
}
