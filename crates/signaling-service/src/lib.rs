//! Signaling Service Library
//!
//! Real-time signaling relay for browser peer-to-peer video meshes:
//!
//! - Room registry with host-gated admission and human-shareable display codes
//! - Negotiation relay (offer, answer, ICE candidate) between connections
//! - Presence/status fan-out within a room
//! - Cleanup of rooms when clients drop, so no ghost participants remain
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── RoomActor (one per active room)
//!
//! WebSocket session (one task per client)
//! ├── ClientSession -> registry / room actors
//! └── Relay -> ConnectionDirectory -> target session mailbox
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry and room actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client error codes
//! - [`observability`] - Health, diagnostics and Prometheus metrics
//! - [`relay`] - Connection directory and negotiation routing
//! - [`server`] - WebSocket endpoint
//! - [`session`] - Per-connection event handling and disconnect cleanup

#![warn(clippy::pedantic)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod observability;
pub mod relay;
pub mod server;
pub mod session;
