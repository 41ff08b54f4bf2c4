//! Signaling Service
//!
//! WebSocket signaling relay for peer-to-peer meeting meshes.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:5000, path `/ws`)
//! - HTTP server for health, diagnostics and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Spawn the room registry actor
//! 4. Bind and start the health server (`/health`, `/ready`, `/rooms`, `/metrics`)
//! 5. Bind and start the WebSocket server, then mark ready
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signaling_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use signaling_service::config::Config;
use signaling_service::observability::{
    health_router, init_metrics_recorder, rooms_router, HealthState,
};
use signaling_service::relay::{ConnectionDirectory, Relay};
use signaling_service::server::{self, AppState};
use signaling_service::session::{SessionContext, SessionSettings};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long the registry gets to wind down room actors on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config comes first so logging can honor it
    let config = Config::from_env()?;

    let json_logs = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_level.clone().into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_rooms = config.max_rooms,
        max_room_members = config.max_room_members,
        outbound_buffer = config.outbound_buffer,
        max_frame_bytes = config.max_frame_bytes,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let actor_metrics = ActorMetrics::new();
    let registry = RoomRegistryHandle::new(
        config.instance_id.clone(),
        RegistrySettings {
            max_rooms: config.max_rooms,
            max_room_members: config.max_room_members,
        },
        Arc::clone(&actor_metrics),
    );
    info!("Room registry started");

    // Every server task stops when the registry is cancelled
    let shutdown_token = registry.child_token();

    // Health server (MUST bind - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state))
        .merge(rooms_router(registry.clone()))
        .merge(metrics_router);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // WebSocket server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    let state = AppState {
        context: SessionContext {
            registry: registry.clone(),
            relay: Relay::new(ConnectionDirectory::new()),
            metrics: Arc::clone(&actor_metrics),
            settings: SessionSettings {
                outbound_buffer: config.outbound_buffer,
                max_frame_bytes: config.max_frame_bytes,
            },
        },
        shutdown: shutdown_token.child_token(),
    };
    tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        if let Err(e) = server::serve(ws_listener, state).await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Signaling service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop receiving traffic before tearing anything down
    health_state.set_not_ready();

    shutdown_token.cancel();

    if let Err(e) = registry.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Registry shutdown error");
    }

    // Let session tasks run their cleanup
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Signaling service shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "The process cannot shut down cleanly without its signal handlers"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "The process cannot shut down cleanly without its signal handlers"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
