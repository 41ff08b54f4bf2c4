//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables with defaults for
//! every field, so a bare `signaling-service` starts a usable relay.

use common::config::ObservabilityConfig;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default client WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default relay instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "sig";

/// Default cap on concurrently active rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default cap on members plus pending peers in one room.
///
/// A full mesh costs every peer one media link per other peer, so rooms past
/// a few dozen are unusable long before this bound matters.
pub const DEFAULT_MAX_ROOM_MEMBERS: usize = 16;

/// Default per-connection outbound mailbox size.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default maximum accepted client frame size in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Signaling service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client WebSocket bind address (default: "0.0.0.0:5000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this relay instance.
    pub instance_id: String,

    /// Maximum concurrently active rooms.
    pub max_rooms: usize,

    /// Maximum members plus pending peers per room.
    pub max_room_members: usize,

    /// Per-connection outbound mailbox size. Messages beyond it are dropped.
    pub outbound_buffer: usize,

    /// Maximum accepted client frame size in bytes.
    pub max_frame_bytes: usize,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a numeric variable does not parse
    /// or is zero.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SIGNALING_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIGNALING_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = parse_positive(vars, "SIGNALING_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_room_members =
            parse_positive(vars, "SIGNALING_MAX_ROOM_MEMBERS", DEFAULT_MAX_ROOM_MEMBERS)?;
        let outbound_buffer =
            parse_positive(vars, "SIGNALING_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;
        let max_frame_bytes =
            parse_positive(vars, "SIGNALING_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;

        let json_logs = match vars.get("SIGNALING_JSON_LOGS").map(String::as_str) {
            None => false,
            Some(value) => bool::from_str(value).map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "SIGNALING_JSON_LOGS must be true or false, got {value:?}"
                ))
            })?,
        };

        let log_level = vars
            .get("SIGNALING_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| "signaling_service=debug,tower_http=debug".to_string());

        // Generate instance ID
        let instance_id = vars
            .get("SIGNALING_INSTANCE_ID")
            .cloned()
            .unwrap_or_else(|| {
                let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
                let uuid_suffix = uuid::Uuid::new_v4().to_string();
                let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
                format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
            });

        Ok(Config {
            bind_address,
            health_bind_address,
            instance_id,
            max_rooms,
            max_room_members,
            outbound_buffer,
            max_frame_bytes,
            observability: ObservabilityConfig {
                log_level,
                json_logs,
            },
        })
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
                "{key} must be a positive integer, got {raw:?}"
            ))),
            Ok(value) => Ok(value),
        },
    }
}
