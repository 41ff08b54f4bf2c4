//! `RoomActor` - one actor per active room.
//!
//! The room actor owns all admission state for a single room and is the only
//! writer of it, so join/decide/broadcast/disconnect for one room are
//! serialized while unrelated rooms proceed in parallel.
//!
//! State invariants, held between every message:
//! - `members` and `pending` are disjoint.
//! - `host_id`, when set, is a member.
//! - `display_code` never changes.
//!
//! # Lifecycle
//!
//! 1. Spawned by the registry on the first join attempt for a room ID
//! 2. Runs while at least one member or pending peer remains
//! 3. On becoming empty: closes its mailbox, notifies the registry with
//!    `RoomClosed`, and exits
//!
//! A room that is spawned but never joined dissolves after
//! [`EMPTY_ROOM_GRACE`].

use crate::errors::SignalingError;
use crate::observability::metrics as prom;

use super::connection::ConnectionHandle;
use super::messages::{Admission, RegistryMessage, RoomMessage, RoomSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::protocol::{
    status, MeetingCode, PeerDeparture, PeerStatus, PeerSummary, PermissionRequest,
    ServerMessage, StatusPayload,
};
use common::types::{ConnectionId, DisplayCode, RoomId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How long an empty room waits for its first join before dissolving.
///
/// Covers the gap between a session creating the room and its join arriving;
/// if that session dies in between, nobody else would ever empty the room.
pub const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(30);

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Ask to enter the room.
    ///
    /// # Errors
    ///
    /// `RoomFull` when the room is at capacity, `RoomClosed` if the actor
    /// dissolved before handling the request.
    pub async fn join(
        &self,
        connection: ConnectionHandle,
        name: String,
        is_host: bool,
    ) -> Result<Admission, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            connection,
            name,
            is_host,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Host decision on a pending peer.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` if `host_id` is not the room's current host.
    pub async fn decide(
        &self,
        host_id: ConnectionId,
        target_id: ConnectionId,
        approved: bool,
    ) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Decide {
            host_id,
            target_id,
            approved,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Fan a status update out to every other member.
    ///
    /// Returns how many members it was queued for.
    ///
    /// # Errors
    ///
    /// `RoomClosed` if the actor is gone.
    pub async fn broadcast_status(
        &self,
        source_id: ConnectionId,
        payload: StatusPayload,
    ) -> Result<usize, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::BroadcastStatus {
            source_id,
            payload,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// End the meeting for everyone.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` unless `requester` is the current host.
    pub async fn end_meeting(&self, requester: ConnectionId) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::EndMeeting {
            requester,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Remove a dropped connection. Resolves once the removal is applied.
    ///
    /// # Errors
    ///
    /// `RoomClosed` if the actor already dissolved.
    pub async fn connection_disconnected(
        &self,
        connection_id: ConnectionId,
    ) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::ConnectionDisconnected {
            connection_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await
    }

    /// Current room state.
    ///
    /// # Errors
    ///
    /// `RoomClosed` if the actor is gone.
    pub async fn get_state(&self) -> Result<RoomSnapshot, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;
        self.receive(rx).await
    }

    /// Whether the actor has stopped accepting messages.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), SignalingError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SignalingError::RoomClosed(self.room_id.to_string()))
    }

    async fn receive<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, SignalingError> {
        rx.await
            .map_err(|_| SignalingError::RoomClosed(self.room_id.to_string()))
    }
}

/// Identity and limits of a room actor.
#[derive(Debug, Clone)]
pub struct RoomParams {
    pub room_id: RoomId,
    pub instance: Uuid,
    pub display_code: DisplayCode,
    /// Cap on members plus pending peers.
    pub max_members: usize,
}

/// A connection known to the room.
#[derive(Debug)]
struct Participant {
    name: String,
    connection: ConnectionHandle,
    /// Admission order; lower joined earlier.
    seq: u64,
}

impl Participant {
    fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.connection.connection_id(),
            name: self.name.clone(),
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    instance: Uuid,
    display_code: DisplayCode,
    max_members: usize,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Used only to report `RoomClosed`; the registry never waits on rooms.
    registry: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    host_id: Option<ConnectionId>,
    members: HashMap<ConnectionId, Participant>,
    pending: HashMap<ConnectionId, Participant>,
    /// Connections the host rejected; never queued again.
    denied: HashSet<ConnectionId>,
    next_seq: u64,
    dissolved: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        params: RoomParams,
        registry: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let room_id = params.room_id.clone();

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
            room_id: params.room_id,
            instance: params.instance,
            display_code: params.display_code,
            max_members: params.max_members,
            receiver,
            registry,
            cancel_token: cancel_token.clone(),
            host_id: None,
            members: HashMap::new(),
            pending: HashMap::new(),
            denied: HashSet::new(),
            next_seq: 0,
            dissolved: false,
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sig.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            display_code = %self.display_code,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sig.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                () = tokio::time::sleep(EMPTY_ROOM_GRACE), if self.is_empty() => {
                    info!(
                        target: "sig.actor.room",
                        room_id = %self.room_id,
                        "Room stayed empty past grace period"
                    );
                    self.dissolve().await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sig.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }

            if self.dissolved {
                break;
            }
        }

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            members = self.members.len(),
            pending = self.pending.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                connection,
                name,
                is_host,
                respond_to,
            } => {
                let result = self.handle_join(connection, name, is_host);
                match &result {
                    Ok(admission) => prom::record_admission(admission.as_str()),
                    Err(e) => prom::record_admission(e.kind()),
                }
                let _ = respond_to.send(result);
            }

            RoomMessage::Decide {
                host_id,
                target_id,
                approved,
                respond_to,
            } => {
                let result = self.handle_decide(host_id, target_id, approved);
                let _ = respond_to.send(result);
            }

            RoomMessage::BroadcastStatus {
                source_id,
                payload,
                respond_to,
            } => {
                let result = self.handle_broadcast(source_id, payload);
                let _ = respond_to.send(result);
            }

            RoomMessage::EndMeeting {
                requester,
                respond_to,
            } => {
                let result = self.handle_end_meeting(requester).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectionDisconnected {
                connection_id,
                respond_to,
            } => {
                self.handle_disconnect(connection_id).await;
                let _ = respond_to.send(());
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn handle_join(
        &mut self,
        connection: ConnectionHandle,
        name: String,
        is_host: bool,
    ) -> Result<Admission, SignalingError> {
        let id = connection.connection_id();

        // A denial binds the connection, whatever role it claims next.
        if self.denied.contains(&id) {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %id,
                claims_host = is_host,
                "Join from denied connection"
            );
            connection.deliver(ServerMessage::PermissionDenied);
            return Ok(Admission::Denied);
        }

        if is_host || self.host_id == Some(id) {
            return self.admit_host(connection, name);
        }

        if self.members.contains_key(&id) {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %id,
                "Repeated join from member"
            );
            connection.deliver(ServerMessage::AllUsers(self.peer_list(Some(id))));
            return Ok(Admission::Member);
        }

        if self.pending.contains_key(&id) {
            connection.deliver(ServerMessage::WaitingForPermission(self.meeting_code()));
            return Ok(Admission::Pending);
        }

        self.ensure_capacity()?;

        connection.deliver(ServerMessage::WaitingForPermission(self.meeting_code()));
        if let Some(host) = self.host() {
            host.connection
                .deliver(ServerMessage::PermissionRequested(PermissionRequest {
                    peer_id: id,
                    name: name.clone(),
                }));
        }

        let seq = self.take_seq();
        self.pending.insert(
            id,
            Participant {
                name,
                connection,
                seq,
            },
        );

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            connection_id = %id,
            pending = self.pending.len(),
            host_present = self.host_id.is_some(),
            "Peer waiting for host approval"
        );

        Ok(Admission::Pending)
    }

    fn admit_host(
        &mut self,
        connection: ConnectionHandle,
        name: String,
    ) -> Result<Admission, SignalingError> {
        let id = connection.connection_id();
        let already_member = self.members.contains_key(&id);

        if !already_member && !self.pending.contains_key(&id) {
            self.ensure_capacity()?;
        }

        if let Some(previous) = self.host_id.filter(|host| *host != id) {
            warn!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                previous_host = %previous,
                new_host = %id,
                "Host authority claimed by another connection"
            );
        }

        let seq = match self.pending.remove(&id) {
            Some(waiting) => waiting.seq,
            None => match self.members.get(&id) {
                Some(member) => member.seq,
                None => self.take_seq(),
            },
        };

        self.host_id = Some(id);

        connection.deliver(ServerMessage::MeetingInfo(self.meeting_code()));
        connection.deliver(ServerMessage::AllUsers(self.peer_list(Some(id))));

        if !already_member {
            self.broadcast_to_members(
                Some(id),
                &ServerMessage::UserJoined(PeerSummary {
                    id,
                    name: name.clone(),
                }),
            );
        }

        // Anyone who queued up before the host arrived still needs a decision.
        let mut waiting: Vec<&Participant> = self.pending.values().collect();
        waiting.sort_by_key(|p| p.seq);
        for peer in waiting {
            connection.deliver(ServerMessage::PermissionRequested(PermissionRequest {
                peer_id: peer.connection.connection_id(),
                name: peer.name.clone(),
            }));
        }

        self.members.insert(
            id,
            Participant {
                name,
                connection,
                seq,
            },
        );

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            connection_id = %id,
            members = self.members.len(),
            rejoin = already_member,
            "Host admitted"
        );

        Ok(Admission::Host)
    }

    fn handle_decide(
        &mut self,
        host_id: ConnectionId,
        target_id: ConnectionId,
        approved: bool,
    ) -> Result<(), SignalingError> {
        if self.host_id != Some(host_id) {
            warn!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                "Non-host attempted admission decision"
            );
            return Err(SignalingError::PermissionDenied(
                "Only the host can admit participants".to_string(),
            ));
        }

        let Some(mut participant) = self.pending.remove(&target_id) else {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                target_id = %target_id,
                "Decision for peer that is not pending, ignoring"
            );
            return Ok(());
        };

        if approved {
            participant.seq = self.take_seq();
            participant
                .connection
                .deliver(ServerMessage::PermissionGranted);
            participant
                .connection
                .deliver(ServerMessage::AllUsers(self.peer_list(None)));
            self.broadcast_to_members(None, &ServerMessage::UserJoined(participant.summary()));
            self.members.insert(target_id, participant);
            prom::record_admission("approved");

            info!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %target_id,
                members = self.members.len(),
                "Peer approved"
            );
        } else {
            self.denied.insert(target_id);
            participant
                .connection
                .deliver(ServerMessage::PermissionDenied);
            prom::record_admission("rejected");

            info!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %target_id,
                "Peer denied"
            );
        }

        Ok(())
    }

    fn handle_broadcast(
        &mut self,
        source_id: ConnectionId,
        mut payload: StatusPayload,
    ) -> Result<usize, SignalingError> {
        if !self.members.contains_key(&source_id) {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %source_id,
                "Status from non-member ignored"
            );
            return Ok(0);
        }

        if self.host_id != Some(source_id) && payload.remove(status::RECORDING).is_some() {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %source_id,
                "Stripped recording flag from non-host status"
            );
            if payload.is_empty() {
                return Ok(0);
            }
        }

        let delivered = self.broadcast_to_members(
            Some(source_id),
            &ServerMessage::PeerStatus(PeerStatus {
                from: source_id,
                payload,
            }),
        );
        Ok(delivered)
    }

    async fn handle_end_meeting(&mut self, requester: ConnectionId) -> Result<(), SignalingError> {
        if self.host_id != Some(requester) {
            warn!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                "Non-host attempted to end meeting"
            );
            return Err(SignalingError::PermissionDenied(
                "Only the host can end the meeting".to_string(),
            ));
        }

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            members = self.members.len(),
            pending = self.pending.len(),
            "Host ended meeting"
        );

        for (id, participant) in self.members.iter().chain(self.pending.iter()) {
            if *id != requester {
                participant.connection.deliver(ServerMessage::MeetingEnded);
            }
        }

        self.members.clear();
        self.pending.clear();
        self.host_id = None;
        self.dissolve().await;
        Ok(())
    }

    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        let removed = self
            .members
            .remove(&connection_id)
            .or_else(|| self.pending.remove(&connection_id));

        let Some(participant) = removed else {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Disconnect for unknown connection"
            );
            return;
        };

        if self.host_id == Some(connection_id) {
            // No successor is chosen; host authority stays vacant.
            self.host_id = None;
            info!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                "Host disconnected, room has no host"
            );
        }

        self.broadcast_to_members(
            None,
            &ServerMessage::UserLeft(PeerDeparture {
                id: connection_id,
                name: Some(participant.name),
            }),
        );

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            members = self.members.len(),
            pending = self.pending.len(),
            "Connection left room"
        );

        if self.is_empty() {
            self.dissolve().await;
        }
    }

    /// Stop taking messages and tell the registry this room is gone.
    async fn dissolve(&mut self) {
        self.dissolved = true;
        self.receiver.close();

        let notice = RegistryMessage::RoomClosed {
            room_id: self.room_id.clone(),
            instance: self.instance,
        };
        if self.registry.send(notice).await.is_err() {
            debug!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                "Registry gone before room closed"
            );
        }

        info!(
            target: "sig.actor.room",
            room_id = %self.room_id,
            display_code = %self.display_code,
            "Room dissolved"
        );
    }

    fn snapshot(&self) -> RoomSnapshot {
        let mut pending: Vec<&Participant> = self.pending.values().collect();
        pending.sort_by_key(|p| p.seq);

        RoomSnapshot {
            room_id: self.room_id.clone(),
            display_code: self.display_code.clone(),
            host_id: self.host_id,
            members: self.peer_list(None),
            pending: pending.into_iter().map(Participant::summary).collect(),
            denied_count: self.denied.len(),
        }
    }

    /// Members in join order, optionally leaving one out.
    fn peer_list(&self, except: Option<ConnectionId>) -> Vec<PeerSummary> {
        let mut members: Vec<(&ConnectionId, &Participant)> = self
            .members
            .iter()
            .filter(|(id, _)| Some(**id) != except)
            .collect();
        members.sort_by_key(|(_, p)| p.seq);
        members.into_iter().map(|(_, p)| p.summary()).collect()
    }

    /// Queue `message` for every member except `except`.
    fn broadcast_to_members(&self, except: Option<ConnectionId>, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        for (id, participant) in &self.members {
            if Some(*id) == except {
                continue;
            }
            participant.connection.deliver(message.clone());
            delivered += 1;
        }
        delivered
    }

    fn ensure_capacity(&self) -> Result<(), SignalingError> {
        if self.members.len() + self.pending.len() >= self.max_members {
            warn!(
                target: "sig.actor.room",
                room_id = %self.room_id,
                max_members = self.max_members,
                "Room full, rejecting join"
            );
            return Err(SignalingError::RoomFull(format!(
                "max {} participants",
                self.max_members
            )));
        }
        Ok(())
    }

    fn host(&self) -> Option<&Participant> {
        self.host_id.and_then(|id| self.members.get(&id))
    }

    fn meeting_code(&self) -> MeetingCode {
        MeetingCode {
            meeting_id: self.display_code.clone(),
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty() && self.pending.is_empty()
    }
}
