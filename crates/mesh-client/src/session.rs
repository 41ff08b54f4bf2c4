//! Client session supervisor.
//!
//! `MeshSession` owns the [`PeerMesh`], the [`StatusBoard`] and the current
//! signaling connection. One task runs it:
//!
//! ```text
//! connect -> join-room -> drive (select over relay, links, commands, sweep)
//!    ^                        |
//!    +---- backoff <---- transport lost
//! ```
//!
//! A transport drop discards every link and repeats the join on a fresh
//! connection. Denial and the end of the meeting are terminal and never
//! retried. After `max_reconnect_attempts` consecutive failures the session
//! gives up with [`ClientError::ReconnectExhausted`].

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::mesh::{MeshUpdate, PeerMesh, RemovalReason};
use crate::signaling::{SignalingChannel, SignalingConnector};
use crate::status::StatusBoard;
use crate::transport::{MediaTransport, TaggedLinkEvent, VideoSource};

use common::protocol::{
    BroadcastStatus, ClientMessage, ErrorNotice, GivePermission, JoinRoom, RoomRef, ServerMessage,
    StatusPayload,
};
use common::types::{ConnectionId, DisplayCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Consecutive failed connection attempts before the session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay before the first reconnect attempt; doubles per attempt.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect delay.
pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(8);

/// Command channel buffer size.
const COMMAND_CHANNEL_BUFFER: usize = 64;

/// How a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Local leave or cancellation.
    Left,
    /// The host denied admission.
    Denied,
    /// The host ended the meeting (or we did, as host).
    MeetingEnded,
}

/// Notifications for the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Admitted as host; share this code with guests.
    Hosting(DisplayCode),
    Waiting(DisplayCode),
    /// Host only: someone is waiting for a decision.
    PermissionRequested { peer_id: ConnectionId, name: String },
    Admitted,
    PeerJoined { peer_id: ConnectionId, name: String },
    PeerLeft { peer_id: ConnectionId, name: Option<String> },
    StreamAdded(ConnectionId),
    PeerRemoved { peer_id: ConnectionId, reason: RemovalReason },
    StatusChanged(ConnectionId),
    RecordingChanged(bool),
    Reconnecting { attempt: u32 },
    MediaUnavailable(String),
    /// Error reported by the relay.
    RelayError(ErrorNotice),
}

#[derive(Debug)]
pub enum SessionCommand {
    BroadcastStatus(StatusPayload),
    ReplaceVideo(VideoSource),
    Decide { peer_id: ConnectionId, approved: bool },
    EndMeeting,
    Leave,
}

/// Handle to a running [`MeshSession`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the session has stopped.
    pub async fn broadcast_status(&self, payload: StatusPayload) -> Result<(), ClientError> {
        self.send(SessionCommand::BroadcastStatus(payload)).await
    }

    /// Switch the outgoing video (camera, screen share, none) on every link.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the session has stopped.
    pub async fn replace_video(&self, source: VideoSource) -> Result<(), ClientError> {
        self.send(SessionCommand::ReplaceVideo(source)).await
    }

    /// Host only: admit or reject a waiting peer.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the session has stopped.
    pub async fn decide(&self, peer_id: ConnectionId, approved: bool) -> Result<(), ClientError> {
        self.send(SessionCommand::Decide { peer_id, approved }).await
    }

    /// Host only: end the meeting for everyone.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the session has stopped.
    pub async fn end_meeting(&self) -> Result<(), ClientError> {
        self.send(SessionCommand::EndMeeting).await
    }

    /// # Errors
    ///
    /// Returns `ClientError::SessionClosed` if the session has stopped.
    pub async fn leave(&self) -> Result<(), ClientError> {
        self.send(SessionCommand::Leave).await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, command: SessionCommand) -> Result<(), ClientError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Outcome of one connection.
///
/// `admitted` resets the reconnect budget. Only admission counts: a relay
/// that answers every join with an error and hangs up still exhausts it.
enum Drive {
    Exit(SessionExit),
    Lost { admitted: bool },
}

pub struct MeshSession {
    config: ClientConfig,
    connector: Arc<dyn SignalingConnector>,
    mesh: PeerMesh,
    link_events: mpsc::Receiver<TaggedLinkEvent>,
    status: StatusBoard,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    cancel_token: CancellationToken,
}

impl MeshSession {
    /// Build a session. Nothing connects until [`MeshSession::run`].
    #[must_use]
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn SignalingConnector>,
        transport: Arc<dyn MediaTransport>,
        cancel_token: CancellationToken,
    ) -> (Self, SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (mesh, link_events) = PeerMesh::new(transport, config.mesh_settings());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

        let handle = SessionHandle {
            sender: command_tx,
            cancel_token: cancel_token.clone(),
        };
        let session = Self {
            config,
            connector,
            mesh,
            link_events,
            status: StatusBoard::new(),
            commands: command_rx,
            events: event_tx,
            cancel_token,
        };
        (session, handle, event_rx)
    }

    /// Build a session and run it on a new task.
    pub fn spawn(
        config: ClientConfig,
        connector: Arc<dyn SignalingConnector>,
        transport: Arc<dyn MediaTransport>,
        cancel_token: CancellationToken,
    ) -> (
        SessionHandle,
        mpsc::Receiver<SessionEvent>,
        JoinHandle<Result<SessionExit, ClientError>>,
    ) {
        let (session, handle, events) = Self::new(config, connector, transport, cancel_token);
        let task_handle = tokio::spawn(session.run());
        (handle, events, task_handle)
    }

    /// Connect, join and keep the mesh alive until a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ReconnectExhausted` once
    /// `max_reconnect_attempts` consecutive connections have failed.
    #[instrument(skip_all, name = "mesh.session", fields(room_id = %self.config.room_id))]
    pub async fn run(mut self) -> Result<SessionExit, ClientError> {
        info!(target: "mesh.session", is_host = self.config.is_host, "Session starting");
        let mut failures: u32 = 0;

        let result = loop {
            if self.cancel_token.is_cancelled() {
                break Ok(SessionExit::Left);
            }

            match self.connector.connect().await {
                Ok(mut channel) => match self.drive(&mut channel).await {
                    Drive::Exit(exit) => break Ok(exit),
                    Drive::Lost { admitted } => {
                        if admitted {
                            failures = 0;
                        }
                        warn!(target: "mesh.session", "Signaling connection lost");
                    }
                },
                Err(e) => {
                    warn!(target: "mesh.session", error = %e, "Signaling connect failed");
                }
            }

            // Links negotiated over the old connection are unreachable now.
            self.reset().await;

            failures += 1;
            if failures >= self.config.max_reconnect_attempts {
                break Err(ClientError::ReconnectExhausted { attempts: failures });
            }

            self.emit(SessionEvent::Reconnecting { attempt: failures });
            let delay = self.config.backoff(failures);
            debug!(target: "mesh.session", attempt = failures, delay_ms = delay.as_millis(), "Reconnecting");
            tokio::select! {
                () = self.cancel_token.cancelled() => break Ok(SessionExit::Left),
                () = tokio::time::sleep(delay) => {}
            }
        };

        self.reset().await;
        match &result {
            Ok(exit) => info!(target: "mesh.session", exit = ?exit, "Session stopped"),
            Err(e) => warn!(target: "mesh.session", error = %e, "Session failed"),
        }
        result
    }

    async fn drive(&mut self, channel: &mut SignalingChannel) -> Drive {
        let join = ClientMessage::JoinRoom(JoinRoom {
            room_id: self.config.room_id.clone(),
            is_host: self.config.is_host,
            name: self.config.name.clone(),
        });
        if channel.send(join).await.is_err() {
            return Drive::Lost { admitted: false };
        }

        let mut admitted = false;
        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.config.ghost_sweep_interval,
            self.config.ghost_sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    return Drive::Exit(SessionExit::Left);
                }

                incoming = channel.recv() => {
                    let Some(message) = incoming else {
                        return Drive::Lost { admitted };
                    };
                    admitted |= message.is_admission();
                    match self.handle_server_message(channel, message).await {
                        Ok(Some(exit)) => return Drive::Exit(exit),
                        Ok(None) => {}
                        Err(_) => return Drive::Lost { admitted },
                    }
                }

                Some(event) = self.link_events.recv() => {
                    let updates = self.mesh.handle_link_event(event).await;
                    if self.apply(channel, updates).await.is_err() {
                        return Drive::Lost { admitted };
                    }
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle dropped: nobody can drive the session.
                        return Drive::Exit(SessionExit::Left);
                    };
                    match self.handle_command(channel, command).await {
                        Ok(Some(exit)) => return Drive::Exit(exit),
                        Ok(None) => {}
                        Err(_) => return Drive::Lost { admitted },
                    }
                }

                _ = sweep.tick() => {
                    let updates = self.mesh.sweep_ghosts(Instant::now()).await;
                    if self.apply(channel, updates).await.is_err() {
                        return Drive::Lost { admitted };
                    }
                }
            }
        }
    }

    async fn handle_server_message(
        &mut self,
        channel: &SignalingChannel,
        message: ServerMessage,
    ) -> Result<Option<SessionExit>, ClientError> {
        debug!(target: "mesh.session", event = message.message_type(), "Relay event");

        match message {
            ServerMessage::MeetingInfo(code) => self.emit(SessionEvent::Hosting(code.meeting_id)),
            ServerMessage::WaitingForPermission(code) => {
                self.emit(SessionEvent::Waiting(code.meeting_id));
            }
            ServerMessage::PermissionRequested(request) => {
                self.emit(SessionEvent::PermissionRequested {
                    peer_id: request.peer_id,
                    name: request.name,
                });
            }
            ServerMessage::PermissionGranted => self.emit(SessionEvent::Admitted),
            ServerMessage::PermissionDenied => return Ok(Some(SessionExit::Denied)),
            ServerMessage::MeetingEnded => return Ok(Some(SessionExit::MeetingEnded)),

            ServerMessage::AllUsers(peers) => {
                for peer in &peers {
                    self.emit(SessionEvent::PeerJoined {
                        peer_id: peer.id,
                        name: peer.name.clone(),
                    });
                }
                let updates = self.mesh.on_all_users(peers).await;
                self.apply(channel, updates).await?;
            }
            ServerMessage::UserJoined(peer) => {
                self.emit(SessionEvent::PeerJoined {
                    peer_id: peer.id,
                    name: peer.name.clone(),
                });
                self.mesh.on_user_joined(peer);
            }
            ServerMessage::UserLeft(departure) => {
                self.status.remove(departure.id);
                let updates = self.mesh.on_user_left(departure.id).await;
                self.emit(SessionEvent::PeerLeft {
                    peer_id: departure.id,
                    name: departure.name,
                });
                self.apply(channel, updates).await?;
            }

            ServerMessage::Offer(offer) => {
                let updates = if offer.ice_restart {
                    self.mesh.on_restart_offer(offer.caller_id, offer.signal).await
                } else {
                    self.mesh.on_offer(offer.caller_id, offer.signal).await
                };
                self.apply(channel, updates).await?;
            }
            ServerMessage::Answer(answer) => {
                let updates = self.mesh.on_answer(answer.id, answer.signal).await;
                self.apply(channel, updates).await?;
            }
            ServerMessage::IceCandidate(candidate) => {
                let updates = self
                    .mesh
                    .on_candidate(candidate.from, candidate.candidate)
                    .await;
                self.apply(channel, updates).await?;
            }

            ServerMessage::PeerStatus(update) => {
                let change = self.status.apply(update.from, &update.payload);
                self.emit(SessionEvent::StatusChanged(update.from));
                if let Some(recording) = change.recording {
                    self.emit(SessionEvent::RecordingChanged(recording));
                }
            }

            ServerMessage::Error(notice) => {
                warn!(
                    target: "mesh.session",
                    code = notice.code,
                    message = %notice.message,
                    "Relay reported an error"
                );
                self.emit(SessionEvent::RelayError(notice));
            }
        }
        Ok(None)
    }

    async fn handle_command(
        &mut self,
        channel: &SignalingChannel,
        command: SessionCommand,
    ) -> Result<Option<SessionExit>, ClientError> {
        let room_id = self.config.room_id.clone();
        match command {
            SessionCommand::BroadcastStatus(payload) => {
                channel
                    .send(ClientMessage::BroadcastStatus(BroadcastStatus { room_id, payload }))
                    .await?;
            }
            SessionCommand::ReplaceVideo(source) => {
                let updates = self.mesh.replace_video(source).await;
                self.apply(channel, updates).await?;
            }
            SessionCommand::Decide { peer_id, approved } => {
                channel
                    .send(ClientMessage::GivePermission(GivePermission {
                        peer_id,
                        room_id,
                        approved,
                    }))
                    .await?;
            }
            SessionCommand::EndMeeting => {
                if !self.config.is_host {
                    warn!(target: "mesh.session", "Only the host can end the meeting, ignoring");
                    return Ok(None);
                }
                channel
                    .send(ClientMessage::EndMeeting(RoomRef { room_id }))
                    .await?;
                return Ok(Some(SessionExit::MeetingEnded));
            }
            SessionCommand::Leave => return Ok(Some(SessionExit::Left)),
        }
        Ok(None)
    }

    /// Carry out mesh updates. Fails only if the relay is unreachable.
    async fn apply(
        &mut self,
        channel: &SignalingChannel,
        updates: Vec<MeshUpdate>,
    ) -> Result<(), ClientError> {
        for update in updates {
            match update {
                MeshUpdate::Signal(message) => channel.send(message).await?,
                MeshUpdate::StreamAdded(peer_id) => self.emit(SessionEvent::StreamAdded(peer_id)),
                MeshUpdate::PeerRemoved { peer_id, reason } => {
                    if reason != RemovalReason::Left {
                        self.status.remove(peer_id);
                    }
                    self.emit(SessionEvent::PeerRemoved { peer_id, reason });
                }
                MeshUpdate::LinkError { peer_id, error } => {
                    warn!(
                        target: "mesh.session",
                        peer_id = %peer_id,
                        error = %error,
                        "Peer link error"
                    );
                    if let ClientError::MediaUnavailable(reason) = error {
                        self.emit(SessionEvent::MediaUnavailable(reason));
                    }
                }
            }
        }
        Ok(())
    }

    async fn reset(&mut self) {
        self.mesh.close_all().await;
        self.status.clear();
    }

    /// Events are advisory; a consumer that stops reading never stalls the mesh.
    fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(target: "mesh.session", error = %e, "Session event dropped");
        }
    }
}

impl std::fmt::Debug for MeshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshSession")
            .field("room_id", &self.config.room_id)
            .field("mesh", &self.mesh)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::peer::Role;
    use crate::transport::{LinkEventSink, PeerLink};
    use async_trait::async_trait;
    use common::protocol::MeetingCode;
    use common::types::RoomId;
    use serde_json::Value;
    use std::sync::Mutex;

    /// Transport that never produces a link; these tests stay off the mesh.
    struct NoMedia;

    #[async_trait]
    impl MediaTransport for NoMedia {
        async fn create_link(
            &self,
            _peer_id: ConnectionId,
            _role: Role,
            _video: VideoSource,
            _events: LinkEventSink,
        ) -> Result<Box<dyn PeerLink>, ClientError> {
            Err(ClientError::MediaUnavailable("no camera".to_string()))
        }
    }

    type RelayEnd = (mpsc::Receiver<ClientMessage>, mpsc::Sender<ServerMessage>);

    /// Connector handing out prepared channels, then failing.
    #[derive(Default)]
    struct QueuedConnector {
        channels: Mutex<Vec<SignalingChannel>>,
        attempts: Mutex<u32>,
    }

    impl QueuedConnector {
        fn push(&self) -> RelayEnd {
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            self.channels
                .lock()
                .unwrap()
                .insert(0, SignalingChannel::new(out_tx, in_rx));
            (out_rx, in_tx)
        }

        /// Queue a connection that answers the join with `replies`, then hangs up.
        fn push_scripted(&self, replies: Vec<ServerMessage>) -> mpsc::Receiver<ClientMessage> {
            let (relay_rx, relay_tx) = self.push();
            for reply in replies {
                relay_tx.try_send(reply).unwrap();
            }
            relay_rx
        }
    }

    #[async_trait]
    impl SignalingConnector for QueuedConnector {
        async fn connect(&self) -> Result<SignalingChannel, ClientError> {
            *self.attempts.lock().unwrap() += 1;
            self.channels
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ClientError::Transport("refused".to_string()))
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new(RoomId::from("0xabc"), "Ada")
            .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_session_joins_and_reports_waiting() {
        let connector = Arc::new(QueuedConnector::default());
        let (mut relay_rx, relay_tx) = connector.push();
        let (handle, mut events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        match relay_rx.recv().await.unwrap() {
            ClientMessage::JoinRoom(join) => {
                assert_eq!(join.room_id, RoomId::from("0xabc"));
                assert!(!join.is_host);
                assert_eq!(join.name, "Ada");
            }
            other => panic!("expected join, got {other:?}"),
        }

        let code = DisplayCode("abc-def-ghi".to_string());
        relay_tx
            .send(ServerMessage::WaitingForPermission(MeetingCode {
                meeting_id: code.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Waiting(code));

        handle.leave().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    }

    #[tokio::test]
    async fn test_denial_is_terminal() {
        let connector = Arc::new(QueuedConnector::default());
        let (_relay_rx, relay_tx) = connector.push();
        let (_handle, _events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        relay_tx.send(ServerMessage::PermissionDenied).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Denied);
        assert_eq!(*connector.attempts.lock().unwrap(), 1, "denial is never retried");
    }

    #[tokio::test]
    async fn test_meeting_ended_is_terminal() {
        let connector = Arc::new(QueuedConnector::default());
        let (_relay_rx, relay_tx) = connector.push();
        let (_handle, _events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        relay_tx.send(ServerMessage::MeetingEnded).await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::MeetingEnded);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_max_attempts() {
        let connector = Arc::new(QueuedConnector::default());
        let (_handle, _events, task) = MeshSession::spawn(
            config().with_max_reconnect_attempts(3),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::ReconnectExhausted { attempts: 3 })
        ));
        assert_eq!(*connector.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_relay_replies_without_admission_use_up_attempts() {
        let connector = Arc::new(QueuedConnector::default());
        let _relays: Vec<_> = (0..10)
            .map(|_| {
                connector.push_scripted(vec![
                    ServerMessage::Error(ErrorNotice {
                        code: 6,
                        message: "Internal error".to_string(),
                    }),
                    ServerMessage::WaitingForPermission(MeetingCode {
                        meeting_id: DisplayCode("abc-def-ghi".to_string()),
                    }),
                ])
            })
            .collect();
        let (_handle, _events, task) = MeshSession::spawn(
            config().with_max_reconnect_attempts(3),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::ReconnectExhausted { attempts: 3 })
        ));
        assert_eq!(*connector.attempts.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_admission_resets_reconnect_budget() {
        let connector = Arc::new(QueuedConnector::default());
        let _relays: Vec<_> = (0..3)
            .map(|_| connector.push_scripted(vec![ServerMessage::PermissionGranted]))
            .collect();
        let (_handle, _events, task) = MeshSession::spawn(
            config().with_max_reconnect_attempts(2),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        // Each admitted connection starts the count over; one refusal then ends it.
        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::ReconnectExhausted { attempts: 2 })
        ));
        assert_eq!(*connector.attempts.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_guest_cannot_end_meeting() {
        let connector = Arc::new(QueuedConnector::default());
        let (mut relay_rx, _relay_tx) = connector.push();
        let (handle, _events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );
        assert!(matches!(relay_rx.recv().await, Some(ClientMessage::JoinRoom(_))));

        handle.end_meeting().await.unwrap();
        handle
            .broadcast_status(crate::status::StatusUpdate::new().audio_on(true).into_payload())
            .await
            .unwrap();
        assert!(matches!(
            relay_rx.recv().await,
            Some(ClientMessage::BroadcastStatus(_))
        ));

        handle.leave().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    }

    #[tokio::test]
    async fn test_transport_drop_rejoins() {
        let connector = Arc::new(QueuedConnector::default());
        let (mut first_rx, first_tx) = connector.push();
        let (mut second_rx, _second_tx) = connector.push();
        let (handle, mut events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        assert!(matches!(first_rx.recv().await, Some(ClientMessage::JoinRoom(_))));
        first_tx.send(ServerMessage::PermissionGranted).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Admitted);
        drop(first_tx);

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Reconnecting { attempt: 1 }
        );
        assert!(matches!(second_rx.recv().await, Some(ClientMessage::JoinRoom(_))));

        handle.cancel();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    }

    #[tokio::test]
    async fn test_media_unavailable_does_not_end_session() {
        let connector = Arc::new(QueuedConnector::default());
        let (mut relay_rx, relay_tx) = connector.push();
        let (handle, mut events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );
        assert!(matches!(relay_rx.recv().await, Some(ClientMessage::JoinRoom(_))));

        let caller = ConnectionId::new();
        relay_tx
            .send(ServerMessage::Offer(common::protocol::RelayedOffer {
                caller_id: caller,
                signal: Value::Null,
                ice_restart: false,
            }))
            .await
            .unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::MediaUnavailable("no camera".to_string())
        );

        // Still serving commands.
        handle
            .broadcast_status(crate::status::StatusUpdate::new().audio_on(false).into_payload())
            .await
            .unwrap();
        assert!(matches!(
            relay_rx.recv().await,
            Some(ClientMessage::BroadcastStatus(_))
        ));

        handle.leave().await.unwrap();
        assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    }

    #[tokio::test]
    async fn test_handle_after_exit_reports_closed() {
        let connector = Arc::new(QueuedConnector::default());
        let (_relay_rx, relay_tx) = connector.push();
        let (handle, _events, task) = MeshSession::spawn(
            config(),
            Arc::clone(&connector) as Arc<dyn SignalingConnector>,
            Arc::new(NoMedia),
            CancellationToken::new(),
        );

        relay_tx.send(ServerMessage::MeetingEnded).await.unwrap();
        task.await.unwrap().unwrap();
        assert!(matches!(
            handle.end_meeting().await,
            Err(ClientError::SessionClosed)
        ));
    }
}
