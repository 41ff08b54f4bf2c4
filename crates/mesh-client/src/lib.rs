//! Synox mesh client.
//!
//! Joins a room through the signaling relay and keeps one media link per
//! remote participant (full mesh). The WebRTC stack itself sits behind the
//! [`transport::MediaTransport`] trait; this crate owns everything around
//! it: admission, offer/answer routing, stale-link handling, ghost cleanup,
//! presence and reconnection.
//!
//! # Architecture
//!
//! ```text
//! SessionHandle --commands--> MeshSession (one task)
//!                               |-- SignalingChannel (WebSocket to the relay)
//!                               |-- PeerMesh --> RemotePeer --> PeerLink
//!                               `-- StatusBoard
//! ```

#![warn(clippy::pedantic)]

pub mod config;
pub mod errors;
pub mod mesh;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod status;
pub mod transport;

pub use config::ClientConfig;
pub use errors::ClientError;
pub use mesh::{MeshSettings, MeshUpdate, PeerMesh, RemovalReason};
pub use peer::{PeerEvent, PeerState, RemotePeer, Role};
pub use session::{MeshSession, SessionCommand, SessionEvent, SessionExit, SessionHandle};
pub use signaling::{SignalingChannel, SignalingConnector, WsConnector};
pub use status::{RemoteStatus, StatusBoard, StatusUpdate};
pub use transport::{
    LinkEvent, LinkEventSink, LinkState, MediaTransport, PeerLink, TaggedLinkEvent, VideoSource,
};
