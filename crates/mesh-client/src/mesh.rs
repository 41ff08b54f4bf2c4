//! Full-mesh peer lifecycle.
//!
//! `PeerMesh` owns one [`RemotePeer`] per remote connection and turns relay
//! events into link operations. It never talks to the relay itself: every
//! method returns the [`MeshUpdate`]s the session has to act on (signals to
//! send, streams to show, peers that went away).
//!
//! Rules:
//!
//! - `all-users` makes us the initiator towards every listed peer.
//! - `user-joined` only registers the peer; it will send us the offer.
//! - An offer for a peer that already has a link replaces that link. The old
//!   link is closed exactly once and its late events are dropped by
//!   generation.
//! - An offer flagged as an ICE restart is applied to the link it restarts;
//!   the link, its generation and its stream survive.
//! - An answer nobody is waiting for is dropped.
//! - Only the side that initiated a link restarts ICE on it.
//! - The ghost sweep removes peers that never produced a stream within
//!   [`GHOST_GRACE_PERIOD`].

use crate::errors::ClientError;
use crate::peer::{PeerEvent, RemotePeer, Role};
use crate::transport::{
    LinkEvent, LinkEventSink, LinkState, MediaTransport, PeerLink, TaggedLinkEvent, VideoSource,
};

use common::protocol::{ClientMessage, PeerSummary, SignalAnswer, SignalCandidate, SignalOffer};
use common::types::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long a peer may go without delivering a media stream before the
/// sweep treats it as abandoned.
///
/// Covers a slow ICE exchange on a poor network; anything longer is almost
/// always a handshake whose remote side reconnected under a new connection
/// ID and will never answer.
pub const GHOST_GRACE_PERIOD: Duration = Duration::from_secs(12);

/// Interval of the ghost sweep.
pub const GHOST_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// ICE restarts attempted on one link before the peer is dropped.
pub const MAX_ICE_RESTARTS: u32 = 2;

/// Capacity of the link event queue shared by all links.
pub const LINK_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct MeshSettings {
    pub ghost_grace: Duration,
    pub max_ice_restarts: u32,
    pub link_event_buffer: usize,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            ghost_grace: GHOST_GRACE_PERIOD,
            max_ice_restarts: MAX_ICE_RESTARTS,
            link_event_buffer: LINK_EVENT_BUFFER,
        }
    }
}

/// Why a peer left the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Relay reported `user-left`.
    Left,
    /// No stream within the grace period.
    Ghost,
    /// ICE restarts exhausted.
    Failed,
    /// Link reported itself closed.
    Closed,
}

impl RemovalReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::Left => "left",
            RemovalReason::Ghost => "ghost",
            RemovalReason::Failed => "failed",
            RemovalReason::Closed => "closed",
        }
    }
}

/// Work the session must carry out after a mesh operation.
#[derive(Debug)]
pub enum MeshUpdate {
    /// Send to the relay.
    Signal(ClientMessage),
    StreamAdded(ConnectionId),
    PeerRemoved {
        peer_id: ConnectionId,
        reason: RemovalReason,
    },
    /// A link operation failed; only this peer is affected.
    LinkError {
        peer_id: ConnectionId,
        error: ClientError,
    },
}

/// The local side of the full mesh.
pub struct PeerMesh {
    transport: Arc<dyn MediaTransport>,
    peers: HashMap<ConnectionId, RemotePeer>,
    next_generation: u64,
    link_events: mpsc::Sender<TaggedLinkEvent>,
    video: VideoSource,
    settings: MeshSettings,
}

impl PeerMesh {
    /// Create an empty mesh and the receiver its links report to.
    #[must_use]
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        settings: MeshSettings,
    ) -> (Self, mpsc::Receiver<TaggedLinkEvent>) {
        let (link_events, link_events_rx) = mpsc::channel(settings.link_event_buffer);
        (
            Self {
                transport,
                peers: HashMap::new(),
                next_generation: 0,
                link_events,
                video: VideoSource::default(),
                settings,
            },
            link_events_rx,
        )
    }

    #[must_use]
    pub fn peer(&self, peer_id: ConnectionId) -> Option<&RemotePeer> {
        self.peers.get(&peer_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    #[must_use]
    pub fn video_source(&self) -> VideoSource {
        self.video
    }

    /// We were admitted: offer to everyone already in the room.
    pub async fn on_all_users(&mut self, peers: Vec<PeerSummary>) -> Vec<MeshUpdate> {
        let mut updates = Vec::with_capacity(peers.len());
        for summary in peers {
            let peer_id = summary.id;
            if let Some(mut previous) = self.peers.remove(&peer_id) {
                previous.close_link().await;
            }

            match self.initiate(summary).await {
                Ok(offer) => updates.push(MeshUpdate::Signal(offer)),
                Err(error) => {
                    warn!(
                        target: "mesh.peer",
                        peer_id = %peer_id,
                        error = %error,
                        "Failed to start negotiation"
                    );
                    updates.push(MeshUpdate::LinkError { peer_id, error });
                }
            }
        }
        updates
    }

    /// A newcomer was admitted; it will offer to us.
    pub fn on_user_joined(&mut self, summary: PeerSummary) {
        let now = Instant::now();
        self.peers
            .entry(summary.id)
            .and_modify(|peer| peer.name = Some(summary.name.clone()))
            .or_insert_with(|| RemotePeer::announced(summary.id, Some(summary.name), now));
    }

    pub async fn on_user_left(&mut self, peer_id: ConnectionId) -> Vec<MeshUpdate> {
        self.remove(peer_id, RemovalReason::Left).await
    }

    /// Answer an offer, replacing any link we already hold for `from`.
    pub async fn on_offer(&mut self, from: ConnectionId, offer: Value) -> Vec<MeshUpdate> {
        let name = match self.peers.remove(&from) {
            Some(mut previous) => {
                if previous.close_link().await {
                    debug!(
                        target: "mesh.peer",
                        peer_id = %from,
                        superseded_generation = previous.generation,
                        "Offer for a linked peer, rebuilding link"
                    );
                }
                previous.name
            }
            None => None,
        };

        let (generation, mut link) = match self.open_link(from, Role::Responder).await {
            Ok(opened) => opened,
            Err(error) => return vec![MeshUpdate::LinkError { peer_id: from, error }],
        };

        let answer = match link.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(error) => {
                link.close().await;
                return vec![MeshUpdate::LinkError { peer_id: from, error }];
            }
        };

        let mut peer = RemotePeer::announced(from, name, Instant::now());
        peer.generation = generation;
        peer.link = Some(link);
        peer.role = Some(Role::Responder);
        peer.transition(PeerEvent::OfferReceived);
        self.peers.insert(from, peer);

        vec![MeshUpdate::Signal(ClientMessage::Answer(SignalAnswer {
            target: from,
            id: None,
            signal: answer,
        }))]
    }

    /// Apply an ICE restart offer to the link we answered earlier.
    ///
    /// Without such a link there is nothing to restart, and the offer is
    /// handled like a first offer.
    pub async fn on_restart_offer(&mut self, from: ConnectionId, offer: Value) -> Vec<MeshUpdate> {
        let restartable = self
            .peers
            .get(&from)
            .is_some_and(|peer| peer.has_link() && peer.role == Some(Role::Responder));
        if !restartable {
            debug!(target: "mesh.peer", peer_id = %from, "ICE restart for an unknown link, treating as new offer");
            return self.on_offer(from, offer).await;
        }
        let Some(peer) = self.peers.get_mut(&from) else {
            return Vec::new();
        };
        let Some(link) = peer.link.as_mut() else {
            return Vec::new();
        };

        match link.accept_offer(offer).await {
            Ok(answer) => {
                peer.transition(PeerEvent::RestartOfferReceived);
                info!(
                    target: "mesh.peer",
                    peer_id = %from,
                    generation = peer.generation,
                    "Remote restarted ICE"
                );
                vec![MeshUpdate::Signal(ClientMessage::Answer(SignalAnswer {
                    target: from,
                    id: None,
                    signal: answer,
                }))]
            }
            Err(error) => vec![MeshUpdate::LinkError { peer_id: from, error }],
        }
    }

    pub async fn on_answer(&mut self, from: ConnectionId, answer: Value) -> Vec<MeshUpdate> {
        let Some(peer) = self.peers.get_mut(&from) else {
            debug!(target: "mesh.peer", peer_id = %from, "Answer from unknown peer, discarding");
            return Vec::new();
        };
        if !peer.awaiting_answer || !peer.transition(PeerEvent::AnswerReceived) {
            debug!(target: "mesh.peer", peer_id = %from, state = %peer.state, "Unexpected answer, discarding");
            return Vec::new();
        }
        peer.awaiting_answer = false;

        let Some(link) = peer.link.as_mut() else {
            return Vec::new();
        };
        match link.accept_answer(answer).await {
            Ok(()) => Vec::new(),
            Err(error) => vec![MeshUpdate::LinkError { peer_id: from, error }],
        }
    }

    pub async fn on_candidate(&mut self, from: ConnectionId, candidate: Value) -> Vec<MeshUpdate> {
        let Some(link) = self.peers.get_mut(&from).and_then(|peer| peer.link.as_mut()) else {
            debug!(target: "mesh.peer", peer_id = %from, "Candidate for a peer without a link, discarding");
            return Vec::new();
        };
        match link.add_candidate(candidate).await {
            Ok(()) => Vec::new(),
            Err(error) => vec![MeshUpdate::LinkError { peer_id: from, error }],
        }
    }

    /// React to something a link reported.
    pub async fn handle_link_event(&mut self, tagged: TaggedLinkEvent) -> Vec<MeshUpdate> {
        let peer_id = tagged.peer_id;
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            debug!(target: "mesh.peer", peer_id = %peer_id, "Event for a removed peer, discarding");
            return Vec::new();
        };
        if peer.generation != tagged.generation || !peer.has_link() {
            debug!(
                target: "mesh.peer",
                peer_id = %peer_id,
                generation = tagged.generation,
                current_generation = peer.generation,
                "Event from a superseded link, discarding"
            );
            return Vec::new();
        }

        match tagged.event {
            LinkEvent::LocalCandidate(candidate) => {
                vec![MeshUpdate::Signal(ClientMessage::IceCandidate(
                    SignalCandidate {
                        target: peer_id,
                        candidate,
                    },
                ))]
            }
            LinkEvent::RemoteStream => {
                if peer.has_stream {
                    debug!(target: "mesh.peer", peer_id = %peer_id, "Duplicate stream, ignoring");
                    return Vec::new();
                }
                peer.has_stream = true;
                vec![MeshUpdate::StreamAdded(peer_id)]
            }
            LinkEvent::StateChanged(LinkState::Connected) => {
                peer.transition(PeerEvent::LinkConnected);
                Vec::new()
            }
            LinkEvent::StateChanged(LinkState::Failed) => self.restart_ice(peer_id).await,
            LinkEvent::StateChanged(LinkState::Closed) => {
                self.remove(peer_id, RemovalReason::Closed).await
            }
            LinkEvent::StateChanged(_) => Vec::new(),
        }
    }

    /// Swap the outgoing video on every live link. No renegotiation.
    pub async fn replace_video(&mut self, source: VideoSource) -> Vec<MeshUpdate> {
        self.video = source;
        let mut updates = Vec::new();

        for peer in self.peers.values_mut() {
            if !peer.has_link() {
                continue;
            }
            // Links still negotiating take the track too, just without the
            // state round trip.
            let replacing = peer.state.on(PeerEvent::ReplaceTrack).ok();
            if let Some(next) = replacing {
                peer.state = next;
            }
            let result = match peer.link.as_mut() {
                Some(link) => link.replace_video(source).await,
                None => Ok(()),
            };
            if let Err(error) = result {
                updates.push(MeshUpdate::LinkError {
                    peer_id: peer.peer_id,
                    error,
                });
            }
            if replacing.is_some() {
                peer.transition(PeerEvent::TrackReplaced);
            }
        }
        updates
    }

    /// Remove every peer with no inbound stream older than the grace period.
    pub async fn sweep_ghosts(&mut self, now: Instant) -> Vec<MeshUpdate> {
        let grace = self.settings.ghost_grace;
        let ghosts: Vec<ConnectionId> = self
            .peers
            .values()
            .filter(|peer| {
                !peer.has_stream && now.saturating_duration_since(peer.added_at) > grace
            })
            .map(|peer| peer.peer_id)
            .collect();

        let mut updates = Vec::with_capacity(ghosts.len());
        for peer_id in ghosts {
            debug!(target: "mesh.peer", peer_id = %peer_id, "Removing ghost peer");
            updates.extend(self.remove(peer_id, RemovalReason::Ghost).await);
        }
        updates
    }

    /// Close every link. Used before a full reconnect and on exit.
    pub async fn close_all(&mut self) -> usize {
        let count = self.peers.len();
        for (_, mut peer) in self.peers.drain() {
            peer.close_link().await;
        }
        if count > 0 {
            info!(target: "mesh.peer", peers = count, "Closed all peer links");
        }
        count
    }

    async fn open_link(
        &mut self,
        peer_id: ConnectionId,
        role: Role,
    ) -> Result<(u64, Box<dyn PeerLink>), ClientError> {
        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = LinkEventSink::new(peer_id, generation, self.link_events.clone());
        let link = self
            .transport
            .create_link(peer_id, role, self.video, sink)
            .await?;

        debug!(
            target: "mesh.peer",
            peer_id = %peer_id,
            role = role.as_str(),
            generation,
            "Link created"
        );
        Ok((generation, link))
    }

    async fn initiate(&mut self, summary: PeerSummary) -> Result<ClientMessage, ClientError> {
        let peer_id = summary.id;
        let (generation, mut link) = self.open_link(peer_id, Role::Initiator).await?;
        let offer = match link.create_offer(false).await {
            Ok(offer) => offer,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };

        let mut peer = RemotePeer::announced(peer_id, Some(summary.name), Instant::now());
        peer.generation = generation;
        peer.link = Some(link);
        peer.role = Some(Role::Initiator);
        peer.transition(PeerEvent::OfferSent);
        peer.awaiting_answer = true;
        self.peers.insert(peer_id, peer);

        Ok(ClientMessage::Offer(SignalOffer {
            target: peer_id,
            caller_id: None,
            signal: offer,
            ice_restart: false,
        }))
    }

    async fn restart_ice(&mut self, peer_id: ConnectionId) -> Vec<MeshUpdate> {
        let max_restarts = self.settings.max_ice_restarts;
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return Vec::new();
        };

        if peer.ice_restarts >= max_restarts {
            warn!(
                target: "mesh.peer",
                peer_id = %peer_id,
                restarts = peer.ice_restarts,
                "ICE restarts exhausted, dropping peer"
            );
            return self.remove(peer_id, RemovalReason::Failed).await;
        }
        peer.ice_restarts += 1;

        if peer.role != Some(Role::Initiator) {
            debug!(
                target: "mesh.peer",
                peer_id = %peer_id,
                failures = peer.ice_restarts,
                "Link failed, waiting for the initiator to restart ICE"
            );
            return Vec::new();
        }
        if peer.state.on(PeerEvent::OfferSent).is_err() {
            return Vec::new();
        }
        let Some(link) = peer.link.as_mut() else {
            return Vec::new();
        };

        match link.create_offer(true).await {
            Ok(offer) => {
                peer.transition(PeerEvent::OfferSent);
                peer.awaiting_answer = true;
                info!(
                    target: "mesh.peer",
                    peer_id = %peer_id,
                    attempt = peer.ice_restarts,
                    "Restarting ICE"
                );
                vec![MeshUpdate::Signal(ClientMessage::Offer(SignalOffer {
                    target: peer_id,
                    caller_id: None,
                    signal: offer,
                    ice_restart: true,
                }))]
            }
            Err(error) => vec![MeshUpdate::LinkError { peer_id, error }],
        }
    }

    async fn remove(&mut self, peer_id: ConnectionId, reason: RemovalReason) -> Vec<MeshUpdate> {
        let Some(mut peer) = self.peers.remove(&peer_id) else {
            return Vec::new();
        };
        peer.close_link().await;
        debug!(
            target: "mesh.peer",
            peer_id = %peer_id,
            reason = reason.as_str(),
            "Peer removed"
        );
        vec![MeshUpdate::PeerRemoved { peer_id, reason }]
    }
}

impl std::fmt::Debug for PeerMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerMesh")
            .field("peers", &self.peers.len())
            .field("next_generation", &self.next_generation)
            .field("video", &self.video)
            .finish_non_exhaustive()
    }
}
