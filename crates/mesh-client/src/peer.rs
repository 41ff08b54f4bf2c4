//! Per-peer connection state.
//!
//! Each remote peer moves through
//!
//! ```text
//! Idle -> Negotiating -> Connected -> (ReplacingTrack -> Connected)* -> Closing -> Closed
//! ```
//!
//! [`PeerState::on`] is the whole transition table. It performs no I/O so the
//! mesh can check a transition before touching the link.

use crate::transport::PeerLink;

use common::types::ConnectionId;
use std::fmt;
use thiserror::Error;
use tokio::time::Instant;

/// Which side of the offer/answer exchange we are on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent the offer.
    Initiator,
    /// We answered the remote's offer.
    Responder,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Known peer without a link; waiting for its offer.
    Idle,
    Negotiating { role: Role },
    Connected,
    /// A new local track is being swapped onto the live link.
    ReplacingTrack,
    Closing,
    Closed,
}

impl PeerState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerState::Idle => "idle",
            PeerState::Negotiating { .. } => "negotiating",
            PeerState::Connected => "connected",
            PeerState::ReplacingTrack => "replacing_track",
            PeerState::Closing => "closing",
            PeerState::Closed => "closed",
        }
    }

    /// Whether the peer still owns (or may own) a link.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self, PeerState::Closing | PeerState::Closed)
    }

    /// Apply `event`, returning the next state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if `event` is not valid in this state.
    /// The state is left unchanged in that case.
    pub fn on(self, event: PeerEvent) -> Result<PeerState, InvalidTransition> {
        let next = match (self, event) {
            // We send an offer: first contact, or an ICE restart on a link we
            // initiated.
            (
                PeerState::Idle
                | PeerState::Connected
                | PeerState::Negotiating {
                    role: Role::Initiator,
                },
                PeerEvent::OfferSent,
            ) => PeerState::Negotiating {
                role: Role::Initiator,
            },

            (PeerState::Idle, PeerEvent::OfferReceived) => PeerState::Negotiating {
                role: Role::Responder,
            },

            // The initiator restarts ICE on the link we answered.
            (
                PeerState::Connected
                | PeerState::Negotiating {
                    role: Role::Responder,
                },
                PeerEvent::RestartOfferReceived,
            ) => PeerState::Negotiating {
                role: Role::Responder,
            },

            (
                PeerState::Negotiating {
                    role: Role::Initiator,
                },
                PeerEvent::AnswerReceived,
            ) => self,

            (PeerState::Negotiating { .. } | PeerState::Connected, PeerEvent::LinkConnected) => {
                PeerState::Connected
            }

            (PeerState::Connected, PeerEvent::ReplaceTrack) => PeerState::ReplacingTrack,
            (PeerState::ReplacingTrack, PeerEvent::TrackReplaced) => PeerState::Connected,

            (PeerState::Closed, PeerEvent::Close) => PeerState::Closed,
            (_, PeerEvent::Close) => PeerState::Closing,
            (PeerState::Closing | PeerState::Closed, PeerEvent::LinkClosed) => PeerState::Closed,

            (state, event) => return Err(InvalidTransition { state, event }),
        };
        Ok(next)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Negotiating { role } => write!(f, "negotiating({})", role.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Inputs to [`PeerState::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    OfferSent,
    OfferReceived,
    /// ICE restart offer for the current link.
    RestartOfferReceived,
    AnswerReceived,
    LinkConnected,
    ReplaceTrack,
    TrackReplaced,
    Close,
    LinkClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid peer transition: {event:?} in state {state}")]
pub struct InvalidTransition {
    pub state: PeerState,
    pub event: PeerEvent,
}

/// One remote participant as seen by the local mesh.
pub struct RemotePeer {
    pub peer_id: ConnectionId,
    pub name: Option<String>,
    pub state: PeerState,
    pub(crate) link: Option<Box<dyn PeerLink>>,
    /// Our side of the current link; only the initiator restarts ICE.
    pub role: Option<Role>,
    /// Generation of the current link. Link events carrying any other
    /// generation belong to a torn-down link.
    pub generation: u64,
    pub added_at: Instant,
    pub has_stream: bool,
    pub ice_restarts: u32,
    /// Set while an offer we sent is unanswered.
    pub awaiting_answer: bool,
}

impl RemotePeer {
    /// A peer announced by `user-joined`; it has no link until its offer arrives.
    #[must_use]
    pub fn announced(peer_id: ConnectionId, name: Option<String>, now: Instant) -> Self {
        Self {
            peer_id,
            name,
            state: PeerState::Idle,
            link: None,
            role: None,
            generation: 0,
            added_at: now,
            has_stream: false,
            ice_restarts: 0,
            awaiting_answer: false,
        }
    }

    #[must_use]
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Apply `event`, logging and ignoring invalid transitions.
    pub(crate) fn transition(&mut self, event: PeerEvent) -> bool {
        match self.state.on(event) {
            Ok(next) => {
                self.state = next;
                true
            }
            Err(e) => {
                tracing::debug!(
                    target: "mesh.peer",
                    peer_id = %self.peer_id,
                    error = %e,
                    "Ignoring peer event"
                );
                false
            }
        }
    }

    /// Close the link, if any. The link is taken out first so it is closed
    /// at most once no matter how often this runs.
    pub(crate) async fn close_link(&mut self) -> bool {
        self.transition(PeerEvent::Close);
        let closed = match self.link.take() {
            Some(mut link) => {
                link.close().await;
                true
            }
            None => false,
        };
        self.transition(PeerEvent::LinkClosed);
        closed
    }
}

impl fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePeer")
            .field("peer_id", &self.peer_id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("has_link", &self.link.is_some())
            .field("role", &self.role)
            .field("generation", &self.generation)
            .field("has_stream", &self.has_stream)
            .field("ice_restarts", &self.ice_restarts)
            .field("awaiting_answer", &self.awaiting_answer)
            .finish_non_exhaustive()
    }
}
