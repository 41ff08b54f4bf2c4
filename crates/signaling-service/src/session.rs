//! Per-connection client session.
//!
//! A `ClientSession` turns decoded client events into registry, room and
//! relay calls for one connection, and remembers every room the connection
//! entered. It knows nothing about WebSockets; `server` feeds it frames and
//! drains its outbound receiver.
//!
//! When the transport goes away, [`ClientSession::close`] runs the cleanup:
//! every joined room is told the connection left (which dissolves rooms that
//! become empty) and the connection is removed from the relay directory.

use crate::actors::{
    display_code, ActorMetrics, Admission, ConnectionHandle, RoomActorHandle, RoomRegistryHandle,
};
use crate::errors::SignalingError;
use crate::observability::metrics as prom;
use crate::relay::{NegotiationKind, NegotiationMessage, Relay};

use common::protocol::{ClientMessage, ErrorNotice, ServerMessage};
use common::types::{ConnectionId, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub outbound_buffer: usize,
    pub max_frame_bytes: usize,
}

/// Everything a session needs from the rest of the service.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub registry: RoomRegistryHandle,
    pub relay: Relay,
    pub metrics: Arc<ActorMetrics>,
    pub settings: SessionSettings,
}

/// One client connection's signaling state.
#[derive(Debug)]
pub struct ClientSession {
    connection: ConnectionHandle,
    cancel_token: CancellationToken,
    context: SessionContext,
    rooms: HashMap<RoomId, RoomActorHandle>,
    /// Display codes this connection joined by, mapped to the room they named.
    aliases: HashMap<RoomId, RoomId>,
}

impl ClientSession {
    /// Register a new connection and return the session with the receiver
    /// its transport must drain.
    pub async fn open(
        context: SessionContext,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (connection, outbound_rx) = ConnectionHandle::new(
            ConnectionId::new(),
            context.settings.outbound_buffer,
            cancel_token.clone(),
            Arc::clone(&context.metrics),
        );

        context.relay.directory().register(connection.clone()).await;
        context.metrics.connection_opened();

        info!(
            target: "sig.session",
            connection_id = %connection.connection_id(),
            "Session opened"
        );

        (
            Self {
                connection,
                cancel_token,
                context,
                rooms: HashMap::new(),
                aliases: HashMap::new(),
            },
            outbound_rx,
        )
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }

    /// Cancelled when the session should stop (server shutdown or a
    /// terminal condition).
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Rooms this connection has entered (as member or pending peer).
    pub fn joined_rooms(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }

    /// Decode and handle one text frame.
    ///
    /// Failures are reported to the client as an `error` event; the
    /// connection stays open.
    pub async fn handle_frame(&mut self, frame: &str) {
        let started = Instant::now();

        let message = match ClientMessage::from_frame(frame, self.context.settings.max_frame_bytes)
        {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    target: "sig.session",
                    connection_id = %self.connection_id(),
                    error = %e,
                    "Rejected client frame"
                );
                prom::record_message("invalid");
                self.report(&SignalingError::from(e));
                return;
            }
        };

        let message_type = message.message_type();
        prom::record_message(message_type);

        if let Err(e) = self.handle_message(message).await {
            debug!(
                target: "sig.session",
                connection_id = %self.connection_id(),
                message_type,
                error = %e,
                "Client event failed"
            );
            self.report(&e);
        }

        prom::record_message_latency(message_type, started.elapsed());
    }

    /// Handle one decoded client event.
    ///
    /// # Errors
    ///
    /// Whatever the registry or room returned; the caller reports it to the
    /// client.
    pub async fn handle_message(&mut self, message: ClientMessage) -> Result<(), SignalingError> {
        match message {
            ClientMessage::JoinRoom(join) => {
                let requested = join.room_id.clone();
                let room_id = self.resolve_room(join.room_id).await?;
                let (room, admission) = self
                    .context
                    .registry
                    .join(&room_id, self.connection.clone(), join.name, join.is_host)
                    .await?;

                debug!(
                    target: "sig.session",
                    connection_id = %self.connection_id(),
                    room_id = %room_id,
                    admission = admission.as_str(),
                    "Join handled"
                );

                if admission != Admission::Denied {
                    if requested != room_id {
                        self.aliases.insert(requested, room_id.clone());
                    }
                    self.rooms.insert(room_id, room);
                }
                Ok(())
            }

            ClientMessage::GivePermission(decision) => {
                let room = self.joined_room(&decision.room_id)?;
                room.decide(self.connection_id(), decision.peer_id, decision.approved)
                    .await
            }

            ClientMessage::Offer(offer) => {
                let kind = NegotiationKind::Offer {
                    ice_restart: offer.ice_restart,
                };
                self.relay(kind, offer.target, offer.signal).await;
                Ok(())
            }

            ClientMessage::Answer(answer) => {
                self.relay(NegotiationKind::Answer, answer.target, answer.signal)
                    .await;
                Ok(())
            }

            ClientMessage::IceCandidate(candidate) => {
                self.relay(
                    NegotiationKind::Candidate,
                    candidate.target,
                    candidate.candidate,
                )
                .await;
                Ok(())
            }

            ClientMessage::BroadcastStatus(update) => {
                let room_id = self.canonical(&update.room_id).clone();
                let Some(room) = self.rooms.get(&room_id) else {
                    debug!(
                        target: "sig.session",
                        connection_id = %self.connection_id(),
                        room_id = %update.room_id,
                        "Status for a room this connection never joined"
                    );
                    return Ok(());
                };
                let result = room
                    .broadcast_status(self.connection_id(), update.payload)
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(SignalingError::RoomClosed(_)) => {
                        self.rooms.remove(&room_id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }

            ClientMessage::EndMeeting(target) => {
                let room_id = self.canonical(&target.room_id).clone();
                let room = self.joined_room(&room_id)?;
                room.end_meeting(self.connection_id()).await?;
                self.rooms.remove(&room_id);
                Ok(())
            }
        }
    }

    /// Leave every joined room and drop out of the relay directory.
    pub async fn close(mut self) {
        let connection_id = self.connection_id();
        let room_count = self.rooms.len();

        for (room_id, room) in self.rooms.drain() {
            if let Err(e) = room.connection_disconnected(connection_id).await {
                // Already dissolved (e.g. the meeting ended).
                debug!(
                    target: "sig.session",
                    connection_id = %connection_id,
                    room_id = %room_id,
                    error = %e,
                    "Room gone before disconnect cleanup"
                );
            }
        }

        self.context.relay.directory().unregister(connection_id).await;
        self.context.metrics.connection_closed();
        self.cancel_token.cancel();

        info!(
            target: "sig.session",
            connection_id = %connection_id,
            rooms_left = room_count,
            "Session closed"
        );
    }

    /// Treat a well-formed display code of an active room as that room.
    async fn resolve_room(&self, requested: RoomId) -> Result<RoomId, SignalingError> {
        if display_code::is_well_formed(requested.as_str()) {
            if let Some(room_id) = self
                .context
                .registry
                .resolve_display_code(requested.as_str())
                .await?
            {
                return Ok(room_id);
            }
        }
        Ok(requested)
    }

    fn canonical<'a>(&'a self, room_id: &'a RoomId) -> &'a RoomId {
        self.aliases.get(room_id).unwrap_or(room_id)
    }

    fn joined_room(&self, room_id: &RoomId) -> Result<&RoomActorHandle, SignalingError> {
        self.rooms.get(self.canonical(room_id)).ok_or_else(|| {
            SignalingError::PermissionDenied("Not a participant of this room".to_string())
        })
    }

    async fn relay(&self, kind: NegotiationKind, target_id: ConnectionId, payload: serde_json::Value) {
        self.context
            .relay
            .route(NegotiationMessage {
                kind,
                source_id: self.connection_id(),
                target_id,
                payload,
            })
            .await;
    }

    fn report(&self, error: &SignalingError) {
        self.connection.deliver(ServerMessage::Error(ErrorNotice {
            code: error.error_code(),
            message: error.client_message(),
        }));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::actors::RegistrySettings;
    use crate::relay::ConnectionDirectory;
    use common::protocol::{JoinRoom, RoomRef};

    fn context() -> SessionContext {
        let metrics = ActorMetrics::new();
        SessionContext {
            registry: RoomRegistryHandle::new(
                "sig-session-test".to_string(),
                RegistrySettings {
                    max_rooms: 8,
                    max_room_members: 8,
                },
                Arc::clone(&metrics),
            ),
            relay: Relay::new(ConnectionDirectory::new()),
            metrics,
            settings: SessionSettings {
                outbound_buffer: 32,
                max_frame_bytes: 1024,
            },
        }
    }

    #[tokio::test]
    async fn test_session_registers_and_unregisters() {
        let ctx = context();
        let (session, _rx) = ClientSession::open(ctx.clone(), CancellationToken::new()).await;
        let id = session.connection_id();

        assert!(ctx.relay.directory().get(id).await.is_some());
        assert_eq!(ctx.metrics.connection_count(), 1);

        session.close().await;
        assert!(ctx.relay.directory().get(id).await.is_none());
        assert_eq!(ctx.metrics.connection_count(), 0);

        ctx.registry.cancel();
    }

    #[tokio::test]
    async fn test_session_invalid_frame_gets_error_event() {
        let ctx = context();
        let (mut session, mut rx) = ClientSession::open(ctx.clone(), CancellationToken::new()).await;

        session.handle_frame("{not json").await;
        match rx.try_recv().unwrap() {
            ServerMessage::Error(notice) => assert_eq!(notice.code, 1),
            other => panic!("expected error, got {other:?}"),
        }

        let oversized = format!(r#"{{"event":"end-meeting","data":{{"roomId":"{}"}}}}"#, "x".repeat(2048));
        session.handle_frame(&oversized).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error(_)));

        assert!(!session.cancel_token().is_cancelled());
        session.close().await;
        ctx.registry.cancel();
    }

    #[tokio::test]
    async fn test_session_join_tracks_room() {
        let ctx = context();
        let (mut session, mut rx) = ClientSession::open(ctx.clone(), CancellationToken::new()).await;

        session
            .handle_message(ClientMessage::JoinRoom(JoinRoom {
                room_id: RoomId::from("tracked"),
                is_host: true,
                name: "Host".to_string(),
            }))
            .await
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::MeetingInfo(_)));
        assert_eq!(
            session.joined_rooms().cloned().collect::<Vec<_>>(),
            vec![RoomId::from("tracked")]
        );

        session.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(matches!(
            ctx.registry.get_room(RoomId::from("tracked")).await,
            Err(SignalingError::RoomNotFound(_))
        ));

        ctx.registry.cancel();
    }

    #[tokio::test]
    async fn test_session_join_by_display_code() {
        let ctx = context();
        let (mut host, _host_rx) = ClientSession::open(ctx.clone(), CancellationToken::new()).await;
        let (mut guest, mut guest_rx) =
            ClientSession::open(ctx.clone(), CancellationToken::new()).await;

        host.handle_message(ClientMessage::JoinRoom(JoinRoom {
            room_id: RoomId::from("0xabc"),
            is_host: true,
            name: "Host".to_string(),
        }))
        .await
        .unwrap();
        let code = ctx
            .registry
            .get_room(RoomId::from("0xabc"))
            .await
            .unwrap()
            .display_code;

        guest
            .handle_message(ClientMessage::JoinRoom(JoinRoom {
                room_id: RoomId::from(code.as_str()),
                is_host: false,
                name: "Guest".to_string(),
            }))
            .await
            .unwrap();

        assert!(matches!(
            guest_rx.try_recv().unwrap(),
            ServerMessage::WaitingForPermission(_)
        ));
        assert_eq!(
            guest.joined_rooms().cloned().collect::<Vec<_>>(),
            vec![RoomId::from("0xabc")]
        );

        // Later events may keep naming the room by its code.
        let result = guest
            .handle_message(ClientMessage::EndMeeting(RoomRef {
                room_id: RoomId::from(code.as_str()),
            }))
            .await;
        assert!(
            matches!(result, Err(SignalingError::PermissionDenied(ref msg)) if msg.contains("host")),
            "code should resolve to the joined room, got {result:?}"
        );

        host.close().await;
        guest.close().await;
        ctx.registry.cancel();
    }

    #[tokio::test]
    async fn test_session_end_meeting_requires_membership() {
        let ctx = context();
        let (mut session, _rx) = ClientSession::open(ctx.clone(), CancellationToken::new()).await;

        let result = session
            .handle_message(ClientMessage::EndMeeting(RoomRef {
                room_id: RoomId::from("elsewhere"),
            }))
            .await;
        assert!(matches!(result, Err(SignalingError::PermissionDenied(_))));

        session.close().await;
        ctx.registry.cancel();
    }
}
