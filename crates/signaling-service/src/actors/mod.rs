//! Actor model for the signaling service.
//!
//! ```text
//! RoomRegistryActor (singleton per service instance)
//! ├── owns roomId -> room handle and the active display codes
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns host, members, pending, denied
//!         └── delivers to ConnectionHandles (one per WebSocket session)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One actor per room**: admission for one room is serialized, rooms run in parallel
//! - **Registry never awaits rooms**: rooms report their own dissolution
//! - **CancellationToken propagation**: the registry hands each room a child token
//! - **Non-blocking delivery**: room actors `try_send` into client mailboxes
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that maps rooms to actors
//! - [`room`] - `RoomActor` per active room, owns admission state
//! - [`connection`] - outbound mailbox handle for one client
//! - [`display_code`] - human-shareable room codes
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod display_code;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{ConnectionHandle, Delivery};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use registry::{RegistrySettings, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle, RoomParams};
