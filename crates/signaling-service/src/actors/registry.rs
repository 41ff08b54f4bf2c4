//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The registry is the top-level actor of the signaling service:
//!
//! - Singleton per service instance
//! - Maps `roomId` to a live `RoomActor` and owns the set of active display codes
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! The registry never awaits a room actor. Rooms report their own
//! dissolution with `RoomClosed`, tagged with the instance UUID they were
//! spawned with so a stale notice cannot evict a newer room.
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all rooms)
//! 3. Waits for room tasks to finish

use crate::errors::SignalingError;

use super::connection::ConnectionHandle;
use super::display_code;
use super::messages::{Admission, RegistryMessage, RegistryStatus, RoomEntry};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomParams};

use common::types::{DisplayCode, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Attempts at joining a room that dissolves between lookup and join.
///
/// A room empties and closes its mailbox concurrently with a new joiner
/// fetching its handle; the retry gets a freshly spawned room. More than a
/// couple of losses in a row means something else is wrong.
pub const ROOM_JOIN_ATTEMPTS: usize = 3;

/// How long room actors get to stop when shutdown is triggered by
/// cancellation rather than [`RoomRegistryHandle::shutdown`].
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Limits applied when spawning rooms.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub max_rooms: usize,
    pub max_room_members: usize,
}

/// Handle to the `RoomRegistryActor`.
///
/// This is the public interface for interacting with the registry.
/// All methods are async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Spawn the registry actor and return a handle to it.
    #[must_use]
    pub fn new(instance_id: String, settings: RegistrySettings, metrics: Arc<ActorMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            instance_id,
            settings,
            receiver,
            sender.clone(),
            cancel_token.clone(),
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Return the live room for `room_id`, creating it if needed.
    ///
    /// # Errors
    ///
    /// `Draining` during shutdown, `CapacityExceeded` at the room limit.
    pub async fn get_or_create_room(
        &self,
        room_id: RoomId,
    ) -> Result<RoomActorHandle, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Join `room_id`, spawning the room if it does not exist.
    ///
    /// Retries when the room dissolves between lookup and join.
    ///
    /// # Errors
    ///
    /// Anything `get_or_create_room` or the room's admission returns.
    pub async fn join(
        &self,
        room_id: &RoomId,
        connection: ConnectionHandle,
        name: String,
        is_host: bool,
    ) -> Result<(RoomActorHandle, Admission), SignalingError> {
        for attempt in 1..=ROOM_JOIN_ATTEMPTS {
            let room = self.get_or_create_room(room_id.clone()).await?;
            match room.join(connection.clone(), name.clone(), is_host).await {
                Ok(admission) => return Ok((room, admission)),
                Err(SignalingError::RoomClosed(_)) => {
                    debug!(
                        target: "sig.actor.registry",
                        room_id = %room_id,
                        attempt,
                        "Room dissolved during join, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(SignalingError::RoomClosed(room_id.to_string()))
    }

    /// Look up an existing room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if no live room has this ID.
    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomEntry, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Map an active display code to its room.
    ///
    /// A live room whose own key equals `code` wins over any display code, so
    /// a room key is never redirected to another room.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry is gone.
    pub async fn resolve_display_code(
        &self,
        code: impl Into<String>,
    ) -> Result<Option<RoomId>, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ResolveDisplayCode {
                code: code.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Every registered room, oldest first.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry is gone.
    pub async fn list_rooms(&self) -> Result<Vec<RoomEntry>, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ListRooms { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current registry status.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry is gone.
    pub async fn get_status(&self) -> Result<RegistryStatus, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    ///
    /// # Errors
    ///
    /// `Internal` if the registry is gone.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that should stop with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    instance: Uuid,
    display_code: DisplayCode,
    created_at: i64,
}

impl ManagedRoom {
    fn entry(&self) -> RoomEntry {
        RoomEntry {
            room_id: self.handle.room_id().clone(),
            display_code: self.display_code.clone(),
            instance: self.instance,
            created_at: self.created_at,
            handle: self.handle.clone(),
        }
    }
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    instance_id: String,
    settings: RegistrySettings,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Given to each room so it can report `RoomClosed`.
    self_sender: mpsc::Sender<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Active display codes.
    codes: HashMap<DisplayCode, RoomId>,
    /// Whether the registry is accepting new rooms.
    accepting_new: bool,
    /// Total time room actors get to stop once shutdown starts.
    shutdown_deadline: Duration,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        instance_id: String,
        settings: RegistrySettings,
        receiver: mpsc::Receiver<RegistryMessage>,
        self_sender: mpsc::Sender<RegistryMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &instance_id);

        Self {
            instance_id,
            settings,
            receiver,
            self_sender,
            cancel_token,
            rooms: HashMap::new(),
            codes: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: DEFAULT_SHUTDOWN_DEADLINE,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "sig.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            max_rooms = self.settings.max_rooms,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sig.actor.registry",
                        instance_id = %self.instance_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sig.actor.registry",
                                instance_id = %self.instance_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self
                    .rooms
                    .get(&room_id)
                    .filter(|managed| !managed.handle.is_closed())
                    .map(ManagedRoom::entry)
                    .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()));
                let _ = respond_to.send(result);
            }

            RegistryMessage::ResolveDisplayCode { code, respond_to } => {
                let is_live = |room_id: &RoomId| {
                    self.rooms
                        .get(room_id)
                        .is_some_and(|managed| !managed.handle.is_closed())
                };
                let exact = RoomId::from(code.as_str());
                let room_id = if is_live(&exact) {
                    Some(exact)
                } else {
                    self.codes
                        .get(&DisplayCode(code))
                        .filter(|room_id| is_live(room_id))
                        .cloned()
                };
                let _ = respond_to.send(room_id);
            }

            RegistryMessage::ListRooms { respond_to } => {
                let mut entries: Vec<RoomEntry> =
                    self.rooms.values().map(ManagedRoom::entry).collect();
                entries.sort_by_key(|entry| entry.created_at);
                let _ = respond_to.send(entries);
            }

            RegistryMessage::RoomClosed { room_id, instance } => {
                self.room_closed(&room_id, instance);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline);
                let _ = respond_to.send(result);
            }
        }
    }

    fn get_or_create_room(&mut self, room_id: RoomId) -> Result<RoomActorHandle, SignalingError> {
        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.handle.is_closed() {
                return Ok(managed.handle.clone());
            }
            // Dissolved, but its RoomClosed notice has not been handled yet.
            let instance = managed.instance;
            self.room_closed(&room_id, instance);
        }

        if !self.accepting_new {
            return Err(SignalingError::Draining);
        }

        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "sig.actor.registry",
                instance_id = %self.instance_id,
                max_rooms = self.settings.max_rooms,
                "Room limit reached"
            );
            return Err(SignalingError::CapacityExceeded);
        }

        let display_code = self.allocate_display_code()?;
        let instance = Uuid::new_v4();

        debug!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            "Creating new room actor"
        );

        let (handle, task_handle) = RoomActor::spawn(
            RoomParams {
                room_id: room_id.clone(),
                instance,
                display_code: display_code.clone(),
                max_members: self.settings.max_room_members,
            },
            self.self_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.codes.insert(display_code.clone(), room_id.clone());
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                instance,
                display_code,
                created_at: chrono::Utc::now().timestamp(),
            },
        );

        self.metrics.room_created();

        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room actor created"
        );

        Ok(handle)
    }

    fn allocate_display_code(&self) -> Result<DisplayCode, SignalingError> {
        let mut rng = rand::thread_rng();
        let taken = |code: &DisplayCode| {
            self.codes.contains_key(code) || self.rooms.contains_key(&RoomId::from(code.as_str()))
        };
        display_code::generate_unique(&mut rng, taken).ok_or_else(
            || {
                error!(
                    target: "sig.actor.registry",
                    instance_id = %self.instance_id,
                    active_codes = self.codes.len(),
                    "Could not generate an unused display code"
                );
                SignalingError::Internal("display code space exhausted".to_string())
            },
        )
    }

    /// Forget a dissolved room if `instance` still matches.
    fn room_closed(&mut self, room_id: &RoomId, instance: Uuid) {
        let matches = self
            .rooms
            .get(room_id)
            .is_some_and(|managed| managed.instance == instance);
        if !matches {
            debug!(
                target: "sig.actor.registry",
                instance_id = %self.instance_id,
                room_id = %room_id,
                "Stale room-closed notice ignored"
            );
            return;
        }

        if let Some(managed) = self.rooms.remove(room_id) {
            self.codes.remove(&managed.display_code);
            self.metrics.room_removed();
            spawn_task_reaper(self.instance_id.clone(), room_id.clone(), managed.task_handle);

            info!(
                target: "sig.actor.registry",
                instance_id = %self.instance_id,
                room_id = %room_id,
                total_rooms = self.rooms.len(),
                "Room actor removed"
            );
        }
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            connection_count: self.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), SignalingError> {
        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            deadline_secs = deadline.as_secs(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.shutdown_deadline = deadline;
        self.cancel_token.cancel();

        Ok(())
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_deadline;
        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sig.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sig.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sig.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }
        self.codes.clear();

        info!(
            target: "sig.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop rooms whose task ended without a `RoomClosed` notice.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            self.codes.remove(&managed.display_code);
            self.metrics.room_removed();

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sig.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sig.actor.registry",
                            instance_id = %self.instance_id,
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked - room state lost"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }
        }
    }
}

/// Wait for a removed room's task in the background so the message loop
/// never blocks on it.
fn spawn_task_reaper(instance_id: String, room_id: RoomId, task_handle: JoinHandle<()>) {
    tokio::spawn(async move {
        match tokio::time::timeout(Duration::from_secs(5), task_handle).await {
            Ok(Ok(())) => {
                debug!(
                    target: "sig.actor.registry",
                    instance_id = %instance_id,
                    room_id = %room_id,
                    "Room actor task completed cleanly"
                );
            }
            Ok(Err(e)) => {
                warn!(
                    target: "sig.actor.registry",
                    instance_id = %instance_id,
                    room_id = %room_id,
                    error = ?e,
                    "Room actor task panicked during removal"
                );
            }
            Err(_) => {
                warn!(
                    target: "sig.actor.registry",
                    instance_id = %instance_id,
                    room_id = %room_id,
                    "Room actor task cleanup timed out"
                );
            }
        }
    });
}
