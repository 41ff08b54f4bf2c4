//! Recording media transport for mesh tests.
//!
//! Every link `MockTransport` creates is backed by a shared [`MockLinkState`]
//! that records what the mesh did to it (offers, answers, candidates, track
//! swaps, closes) and lets the test emit link events as if the WebRTC stack
//! had produced them.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = MockTransport::new();
//! let (mut mesh, _events) = PeerMesh::new(transport.clone(), MeshSettings::default());
//! mesh.on_offer(peer_id, json!({"type": "offer"})).await;
//!
//! let link = transport.latest(peer_id).unwrap();
//! link.stream_arrived();
//! assert_eq!(link.close_count(), 0);
//! ```

use async_trait::async_trait;
use common::types::ConnectionId;
use mesh_client::errors::ClientError;
use mesh_client::peer::Role;
use mesh_client::transport::{
    LinkEvent, LinkEventSink, LinkState, MediaTransport, PeerLink, VideoSource,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What happened to one mock link.
#[derive(Debug)]
pub struct MockLinkState {
    pub peer_id: ConnectionId,
    pub role: Role,
    pub generation: u64,
    pub initial_video: VideoSource,
    sink: LinkEventSink,
    closes: AtomicUsize,
    offers: Mutex<Vec<bool>>,
    remote_offers: Mutex<Vec<Value>>,
    answers: Mutex<Vec<Value>>,
    candidates: Mutex<Vec<Value>>,
    replaced: Mutex<Vec<VideoSource>>,
}

impl MockLinkState {
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `ice_restart` flag of every offer this link produced.
    #[must_use]
    pub fn offers(&self) -> Vec<bool> {
        self.offers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn remote_offers(&self) -> Vec<Value> {
        self.remote_offers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn answers(&self) -> Vec<Value> {
        self.answers.lock().unwrap().clone()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<Value> {
        self.candidates.lock().unwrap().clone()
    }

    #[must_use]
    pub fn replaced(&self) -> Vec<VideoSource> {
        self.replaced.lock().unwrap().clone()
    }

    /// Emit a link event as the WebRTC stack would.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.sink.emit(event)
    }

    pub fn stream_arrived(&self) -> bool {
        self.emit(LinkEvent::RemoteStream)
    }

    pub fn connected(&self) -> bool {
        self.emit(LinkEvent::StateChanged(LinkState::Connected))
    }

    pub fn failed(&self) -> bool {
        self.emit(LinkEvent::StateChanged(LinkState::Failed))
    }

    pub fn local_candidate(&self, candidate: Value) -> bool {
        self.emit(LinkEvent::LocalCandidate(candidate))
    }
}

/// [`MediaTransport`] that records every link it creates.
#[derive(Debug, Default)]
pub struct MockTransport {
    links: Mutex<Vec<Arc<MockLinkState>>>,
    media_unavailable: AtomicBool,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `create_link` fail with `MediaUnavailable`.
    pub fn set_media_unavailable(&self, unavailable: bool) {
        self.media_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every link ever created, in creation order.
    #[must_use]
    pub fn links(&self) -> Vec<Arc<MockLinkState>> {
        self.links.lock().unwrap().clone()
    }

    #[must_use]
    pub fn links_for(&self, peer_id: ConnectionId) -> Vec<Arc<MockLinkState>> {
        self.links()
            .into_iter()
            .filter(|link| link.peer_id == peer_id)
            .collect()
    }

    /// The most recent link to `peer_id`.
    #[must_use]
    pub fn latest(&self, peer_id: ConnectionId) -> Option<Arc<MockLinkState>> {
        self.links_for(peer_id).pop()
    }

    #[must_use]
    pub fn total_closes(&self) -> usize {
        self.links().iter().map(|link| link.close_count()).sum()
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn create_link(
        &self,
        peer_id: ConnectionId,
        role: Role,
        video: VideoSource,
        events: LinkEventSink,
    ) -> Result<Box<dyn PeerLink>, ClientError> {
        if self.media_unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::MediaUnavailable(
                "camera permission denied".to_string(),
            ));
        }

        let state = Arc::new(MockLinkState {
            peer_id,
            role,
            generation: events.generation(),
            initial_video: video,
            sink: events,
            closes: AtomicUsize::new(0),
            offers: Mutex::new(Vec::new()),
            remote_offers: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            replaced: Mutex::new(Vec::new()),
        });
        self.links.lock().unwrap().push(Arc::clone(&state));
        Ok(Box::new(MockLink { state }))
    }
}

struct MockLink {
    state: Arc<MockLinkState>,
}

impl MockLink {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.state.close_count() > 0 {
            return Err(ClientError::Link("link closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for MockLink {
    async fn create_offer(&mut self, ice_restart: bool) -> Result<Value, ClientError> {
        self.ensure_open()?;
        self.state.offers.lock().unwrap().push(ice_restart);
        Ok(json!({
            "type": "offer",
            "sdp": format!("offer-{}", self.state.generation),
            "iceRestart": ice_restart,
        }))
    }

    async fn accept_offer(&mut self, offer: Value) -> Result<Value, ClientError> {
        self.ensure_open()?;
        self.state.remote_offers.lock().unwrap().push(offer);
        Ok(json!({
            "type": "answer",
            "sdp": format!("answer-{}", self.state.generation),
        }))
    }

    async fn accept_answer(&mut self, answer: Value) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.state.answers.lock().unwrap().push(answer);
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: Value) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.state.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn replace_video(&mut self, source: VideoSource) -> Result<(), ClientError> {
        self.ensure_open()?;
        self.state.replaced.lock().unwrap().push(source);
        Ok(())
    }

    async fn close(&mut self) {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}
