//! Health and diagnostics endpoints for the signaling service.
//!
//! - `GET /health` - Liveness (is the process running?)
//! - `GET /ready` - Readiness (can we accept WebSocket sessions?)
//! - `GET /rooms` - Live rooms with membership counts, host presence and display code
//!
//! The `/metrics` endpoint is mounted separately in `main.rs` from the
//! Prometheus handle.

use crate::actors::RoomRegistryHandle;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Liveness and readiness state reported to the orchestrator.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once the WebSocket listener is bound; false again during shutdown.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

/// Create the `/rooms` diagnostics router.
pub fn rooms_router(registry: RoomRegistryHandle) -> Router {
    Router::new()
        .route("/rooms", get(rooms_handler))
        .with_state(registry)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `/rooms` response body.
#[derive(Debug, Serialize)]
pub struct RoomsReport {
    pub room_count: usize,
    pub rooms: Vec<RoomReport>,
}

/// One room in the `/rooms` report. Carries no peer IDs or names.
#[derive(Debug, Serialize)]
pub struct RoomReport {
    pub room_id: String,
    pub display_code: String,
    pub host_present: bool,
    pub members: usize,
    pub pending: usize,
    pub created_at: i64,
}

async fn rooms_handler(
    State(registry): State<RoomRegistryHandle>,
) -> Result<Json<RoomsReport>, StatusCode> {
    let entries = registry.list_rooms().await.map_err(|e| {
        warn!(target: "sig.health", error = %e, "Failed to list rooms");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    // Room state is read outside the registry so a busy room never stalls it.
    let mut rooms = Vec::with_capacity(entries.len());
    for entry in entries {
        let Ok(snapshot) = entry.handle.get_state().await else {
            continue;
        };
        rooms.push(RoomReport {
            room_id: entry.room_id.to_string(),
            display_code: entry.display_code.to_string(),
            host_present: snapshot.host_id.is_some(),
            members: snapshot.members.len(),
            pending: snapshot.pending.len(),
            created_at: entry.created_at,
        });
    }

    Ok(Json(RoomsReport {
        room_count: rooms.len(),
        rooms,
    }))
}
