//! Client side of the signaling socket.
//!
//! A [`SignalingChannel`] is a pair of queues: protocol messages the session
//! sends, and relay events it receives. [`WsConnector`] backs the pair with a
//! WebSocket and two pump tasks. The inbound queue closes when the socket is
//! gone, which is how the session notices a transport drop.

use crate::errors::ClientError;

use async_trait::async_trait;
use common::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Default capacity of each direction of a channel.
pub const SIGNALING_BUFFER: usize = 128;

/// Default largest relay frame accepted, matching the relay's own limit.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One established signaling connection.
#[derive(Debug)]
pub struct SignalingChannel {
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<ServerMessage>,
}

impl SignalingChannel {
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<ClientMessage>,
        inbound: mpsc::Receiver<ServerMessage>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queue `message` for the relay.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the connection is gone.
    pub async fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ClientError::Transport("signaling channel closed".to_string()))
    }

    /// Next relay event, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }
}

/// Opens signaling connections. The session calls it again after every
/// transport drop.
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the relay cannot be reached.
    async fn connect(&self) -> Result<SignalingChannel, ClientError>;
}

/// WebSocket connector for a relay at `url` (e.g. `ws://host:5000/ws`).
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    buffer: usize,
    max_frame_bytes: usize,
}

impl WsConnector {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            buffer: SIGNALING_BUFFER,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }

    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn connect(&self) -> Result<SignalingChannel, ClientError> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("connect to {} failed: {e}", self.url)))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(self.buffer);

        info!(target: "mesh.signaling", url = %self.url, "Signaling connected");

        // Writer: ends when the session drops its channel.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let frame = match message.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(target: "mesh.signaling", error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                    debug!(target: "mesh.signaling", error = %e, "Socket write failed");
                    return;
                }
            }
            let _ = ws_tx.send(Message::Close(None)).await;
        });

        // Reader: ends when the socket closes; dropping inbound_tx tells the
        // session.
        let max_frame_bytes = self.max_frame_bytes;
        tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_frame(&text, max_frame_bytes) {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(target: "mesh.signaling", error = %e, "Dropping undecodable relay frame");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(target: "mesh.signaling", error = %e, "Socket read failed");
                        break;
                    }
                }
            }
            debug!(target: "mesh.signaling", "Signaling reader stopped");
        });

        Ok(SignalingChannel::new(outbound_tx, inbound_rx))
    }
}
