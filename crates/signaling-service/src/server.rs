//! Client-facing WebSocket server.
//!
//! Each upgraded socket gets one task that owns its [`ClientSession`] and
//! multiplexes, in a single `select!`:
//!
//! - shutdown of the session's cancellation token,
//! - the session's outbound mailbox (encoded as JSON text frames),
//! - incoming frames from the socket.
//!
//! Any way out of the loop (close frame, read error, failed write, shutdown)
//! ends in [`ClientSession::close`], so a dropped client is always removed
//! from its rooms.

use crate::session::{ClientSession, SessionContext};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for the WebSocket router.
#[derive(Clone, Debug)]
pub struct AppState {
    pub context: SessionContext,
    /// Parent of every session token.
    pub shutdown: CancellationToken,
}

/// Build the client router (`GET /ws`).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the client router on `listener` until `state.shutdown` is cancelled.
///
/// # Errors
///
/// Returns the underlying I/O error if the server fails.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!(target: "sig.server", "WebSocket server shutting down");
        })
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_frame_bytes = state.context.settings.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(socket: WebSocket, state: AppState) {
    let (mut session, mut outbound_rx) =
        ClientSession::open(state.context.clone(), state.shutdown.child_token()).await;
    let cancel_token = session.cancel_token().clone();
    let connection_id = session.connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            outbound = outbound_rx.recv() => {
                let Some(message) = outbound else {
                    break;
                };
                match message.to_frame() {
                    Ok(frame) => {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            debug!(
                                target: "sig.server",
                                connection_id = %connection_id,
                                "Socket write failed"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "sig.server",
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to encode outbound message"
                        );
                    }
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => session.handle_frame(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "sig.server",
                            connection_id = %connection_id,
                            error = %e,
                            "Socket read failed"
                        );
                        break;
                    }
                    // Binary frames are not part of the protocol
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    session.close().await;
}
