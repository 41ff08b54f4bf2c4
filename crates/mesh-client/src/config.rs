//! Mesh client configuration.

use crate::mesh::{
    MeshSettings, GHOST_GRACE_PERIOD, GHOST_SWEEP_INTERVAL, LINK_EVENT_BUFFER, MAX_ICE_RESTARTS,
};
use crate::session::{MAX_RECONNECT_ATTEMPTS, MAX_RECONNECT_BACKOFF, RECONNECT_BACKOFF};

use common::types::RoomId;
use std::time::Duration;

/// Default capacity of the session event queue.
pub const SESSION_EVENT_BUFFER: usize = 256;

/// Settings for one [`MeshSession`](crate::session::MeshSession).
///
/// Start from [`ClientConfig::new`] and override with the `with_*` methods;
/// every default is one of the named constants.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Room key, or the display code of a live room.
    pub room_id: RoomId,
    pub name: String,
    pub is_host: bool,
    pub ghost_grace: Duration,
    pub ghost_sweep_interval: Duration,
    pub max_ice_restarts: u32,
    /// Consecutive failed connection attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
    pub event_buffer: usize,
}

impl ClientConfig {
    #[must_use]
    pub fn new(room_id: RoomId, name: impl Into<String>) -> Self {
        Self {
            room_id,
            name: name.into(),
            is_host: false,
            ghost_grace: GHOST_GRACE_PERIOD,
            ghost_sweep_interval: GHOST_SWEEP_INTERVAL,
            max_ice_restarts: MAX_ICE_RESTARTS,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff: RECONNECT_BACKOFF,
            max_reconnect_backoff: MAX_RECONNECT_BACKOFF,
            event_buffer: SESSION_EVENT_BUFFER,
        }
    }

    #[must_use]
    pub fn as_host(mut self) -> Self {
        self.is_host = true;
        self
    }

    #[must_use]
    pub fn with_ghost_grace(mut self, grace: Duration) -> Self {
        self.ghost_grace = grace;
        self
    }

    #[must_use]
    pub fn with_ghost_sweep_interval(mut self, interval: Duration) -> Self {
        self.ghost_sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_ice_restarts(mut self, restarts: u32) -> Self {
        self.max_ice_restarts = restarts;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_reconnect_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_backoff = initial;
        self.max_reconnect_backoff = max;
        self
    }

    #[must_use]
    pub fn mesh_settings(&self) -> MeshSettings {
        MeshSettings {
            ghost_grace: self.ghost_grace,
            max_ice_restarts: self.max_ice_restarts,
            link_event_buffer: LINK_EVENT_BUFFER,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based): doubles each time,
    /// capped at `max_reconnect_backoff`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.reconnect_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_reconnect_backoff)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_come_from_constants() {
        let config = ClientConfig::new(RoomId::from("0xabc"), "Ada");
        assert!(!config.is_host);
        assert_eq!(config.ghost_grace, GHOST_GRACE_PERIOD);
        assert_eq!(config.ghost_sweep_interval, GHOST_SWEEP_INTERVAL);
        assert_eq!(config.max_reconnect_attempts, MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.event_buffer, SESSION_EVENT_BUFFER);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ClientConfig::new(RoomId::from("0xabc"), "Ada")
            .as_host()
            .with_ghost_grace(Duration::from_secs(3))
            .with_max_ice_restarts(0)
            .with_max_reconnect_attempts(2);

        assert!(config.is_host);
        let mesh = config.mesh_settings();
        assert_eq!(mesh.ghost_grace, Duration::from_secs(3));
        assert_eq!(mesh.max_ice_restarts, 0);
        assert_eq!(config.max_reconnect_attempts, 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ClientConfig::new(RoomId::from("r"), "Ada")
            .with_reconnect_backoff(Duration::from_millis(500), Duration::from_secs(4));

        assert_eq!(config.backoff(1), Duration::from_millis(500));
        assert_eq!(config.backoff(2), Duration::from_secs(1));
        assert_eq!(config.backoff(3), Duration::from_secs(2));
        assert_eq!(config.backoff(4), Duration::from_secs(4));
        assert_eq!(config.backoff(10), Duration::from_secs(4));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(4));
    }
}
