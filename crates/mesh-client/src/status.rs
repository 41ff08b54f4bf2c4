//! Presence board.
//!
//! Keeps the last known status of every remote peer, merged field by field
//! from `peer-status` events, and the room-wide recording indicator. The
//! relay only forwards `recording` when the host sent it, so any value that
//! arrives here is authoritative for the local indicator.

use common::protocol::{status, StatusPayload};
use common::types::ConnectionId;
use serde_json::Value;
use std::collections::HashMap;

/// Typed view over a peer's merged status fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteStatus {
    pub audio_on: Option<bool>,
    pub video_on: Option<bool>,
    pub speaking: Option<bool>,
    pub hand_raised: Option<bool>,
    pub screen_sharing: Option<bool>,
    pub display_name: Option<String>,
    pub client_class: Option<String>,
    /// Every field ever received, including ones without a typed accessor.
    pub raw: StatusPayload,
}

impl RemoteStatus {
    fn merge(&mut self, payload: &StatusPayload) {
        for (key, value) in payload {
            self.raw.insert(key.clone(), value.clone());
        }
        self.audio_on = flag(&self.raw, status::AUDIO_ON);
        self.video_on = flag(&self.raw, status::VIDEO_ON);
        self.speaking = flag(&self.raw, status::SPEAKING);
        self.hand_raised = flag(&self.raw, status::HAND_RAISED);
        self.screen_sharing = flag(&self.raw, status::SCREEN_SHARING);
        self.display_name = text(&self.raw, status::DISPLAY_NAME);
        self.client_class = text(&self.raw, status::CLIENT_CLASS);
    }
}

fn flag(payload: &StatusPayload, key: &str) -> Option<bool> {
    payload.get(key).and_then(Value::as_bool)
}

fn text(payload: &StatusPayload, key: &str) -> Option<String> {
    payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// What an applied update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusChange {
    /// New value of the recording indicator, if it flipped.
    pub recording: Option<bool>,
}

#[derive(Debug, Default)]
pub struct StatusBoard {
    peers: HashMap<ConnectionId, RemoteStatus>,
    recording: bool,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a `peer-status` payload from `from`.
    pub fn apply(&mut self, from: ConnectionId, payload: &StatusPayload) -> StatusChange {
        self.peers.entry(from).or_default().merge(payload);

        let mut change = StatusChange::default();
        if let Some(recording) = flag(payload, status::RECORDING) {
            if recording != self.recording {
                self.recording = recording;
                change.recording = Some(recording);
            }
        }
        change
    }

    #[must_use]
    pub fn get(&self, peer_id: ConnectionId) -> Option<&RemoteStatus> {
        self.peers.get(&peer_id)
    }

    pub fn remove(&mut self, peer_id: ConnectionId) -> Option<RemoteStatus> {
        self.peers.remove(&peer_id)
    }

    /// Forget every peer. The recording indicator is reset too; the host
    /// repeats it after a rejoin.
    pub fn clear(&mut self) {
        self.peers.clear();
        self.recording = false;
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Builder for the local status payload sent with `broadcast-status`.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    payload: StatusPayload,
}

impl StatusUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn audio_on(self, on: bool) -> Self {
        self.field(status::AUDIO_ON, Value::Bool(on))
    }

    #[must_use]
    pub fn video_on(self, on: bool) -> Self {
        self.field(status::VIDEO_ON, Value::Bool(on))
    }

    #[must_use]
    pub fn speaking(self, speaking: bool) -> Self {
        self.field(status::SPEAKING, Value::Bool(speaking))
    }

    #[must_use]
    pub fn hand_raised(self, raised: bool) -> Self {
        self.field(status::HAND_RAISED, Value::Bool(raised))
    }

    #[must_use]
    pub fn screen_sharing(self, sharing: bool) -> Self {
        self.field(status::SCREEN_SHARING, Value::Bool(sharing))
    }

    /// Only takes effect when sent by the host.
    #[must_use]
    pub fn recording(self, recording: bool) -> Self {
        self.field(status::RECORDING, Value::Bool(recording))
    }

    #[must_use]
    pub fn display_name(self, name: impl Into<String>) -> Self {
        self.field(status::DISPLAY_NAME, Value::String(name.into()))
    }

    #[must_use]
    pub fn client_class(self, class: impl Into<String>) -> Self {
        self.field(status::CLIENT_CLASS, Value::String(class.into()))
    }

    /// Set an application-defined field.
    #[must_use]
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[must_use]
    pub fn into_payload(self) -> StatusPayload {
        self.payload
    }
}
