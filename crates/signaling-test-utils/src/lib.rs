//! # Signaling Test Utilities
//!
//! Shared fixtures and mocks for the signaling relay and the mesh client.
//!
//! ## Modules
//!
//! - `fixtures` - In-process relay (`TestRelay`) and relay-side clients
//!   (`TestClient`) that speak the protocol without a socket
//! - `mock_transport` - Recording `MediaTransport` for mesh tests
//! - `mock_relay` - Scripted `SignalingConnector` for session tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let relay = TestRelay::new();
//!     let mut host = relay.client().await;
//!     host.join("0xfeed", "Host", true).await;
//!     assert!(matches!(host.recv().await, ServerMessage::MeetingInfo(_)));
//!     relay.shutdown();
//! }
//! ```

pub mod fixtures;
pub mod mock_relay;
pub mod mock_transport;

pub use fixtures::*;
pub use mock_relay::*;
pub use mock_transport::*;
