//! Common types shared by the Synox signaling relay and the mesh client.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifiers exchanged on the wire
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for the JSON signaling protocol
pub mod protocol;
