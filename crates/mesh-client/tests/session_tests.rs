//! Mesh session tests driven through a scripted signaling connector.
//!
//! The test plays the relay through `RelayEnd`, and inspects links through
//! `MockTransport`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::protocol::{
    ClientMessage, MeetingCode, PeerStatus, PeerSummary, PermissionRequest, RelayedOffer,
    ServerMessage,
};
use common::types::{ConnectionId, DisplayCode, RoomId};
use mesh_client::config::ClientConfig;
use mesh_client::mesh::RemovalReason;
use mesh_client::session::{MeshSession, SessionEvent, SessionExit};
use mesh_client::status::StatusUpdate;
use serde_json::json;
use signaling_test_utils::{MockConnector, MockTransport, RelayEnd};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ROOM: &str = "0xsession";
const EVENT_TIMEOUT: Duration = Duration::from_secs(30);

fn config() -> ClientConfig {
    ClientConfig::new(RoomId::from(ROOM), "Local")
        .with_reconnect_backoff(Duration::from_millis(10), Duration::from_millis(40))
}

fn code() -> MeetingCode {
    MeetingCode {
        meeting_id: DisplayCode("7ab-4kq-9zm".to_string()),
    }
}

fn peer(id: ConnectionId, name: &str) -> PeerSummary {
    PeerSummary {
        id,
        name: name.to_string(),
    }
}

/// Skip events until `matches` accepts one.
async fn wait_for(
    events: &mut mpsc::Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("Timed out waiting for a session event")
            .expect("Session event channel closed");
        if matches(&event) {
            return event;
        }
    }
}

/// Read the join the session sends on every connection.
async fn expect_join(relay: &mut RelayEnd) {
    match relay.recv().await {
        ClientMessage::JoinRoom(join) => {
            assert_eq!(join.room_id, RoomId::from(ROOM));
            assert_eq!(join.name, "Local");
        }
        other => panic!("expected join-room, got {other:?}"),
    }
}

/// Admitted guests offer to every peer in the all-users list.
#[tokio::test]
async fn test_admitted_guest_offers_to_everyone() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut relay = connector.accept_next();
    let (handle, mut events, task) = MeshSession::spawn(
        config(),
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    expect_join(&mut relay).await;
    relay.send(ServerMessage::WaitingForPermission(code())).await;
    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        SessionEvent::Waiting(_)
    ));

    let a = ConnectionId::new();
    let b = ConnectionId::new();
    relay.send(ServerMessage::PermissionGranted).await;
    relay
        .send(ServerMessage::AllUsers(vec![peer(a, "A"), peer(b, "B")]))
        .await;
    assert_eq!(wait_for(&mut events, |_| true).await, SessionEvent::Admitted);

    let mut targets = Vec::new();
    for _ in 0..2 {
        match relay.recv().await {
            ClientMessage::Offer(offer) => targets.push(offer.target),
            other => panic!("expected offer, got {other:?}"),
        }
    }
    assert_eq!(targets, vec![a, b]);
    assert_eq!(transport.links().len(), 2);

    handle.leave().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    assert_eq!(transport.total_closes(), 2);
}

/// A newcomer's offer is answered and its stream surfaces once.
#[tokio::test]
async fn test_newcomer_offer_is_answered() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut relay = connector.accept_next();
    let (handle, mut events, task) = MeshSession::spawn(
        config().as_host(),
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    expect_join(&mut relay).await;
    relay.send(ServerMessage::MeetingInfo(code())).await;
    relay.send(ServerMessage::AllUsers(Vec::new())).await;

    let c = ConnectionId::new();
    relay.send(ServerMessage::UserJoined(peer(c, "C"))).await;
    relay
        .send(ServerMessage::Offer(RelayedOffer {
            caller_id: c,
            signal: json!({"type": "offer", "sdp": "from-c"}),
            ice_restart: false,
        }))
        .await;

    match relay.recv().await {
        ClientMessage::Answer(answer) => {
            assert_eq!(answer.target, c);
            assert_eq!(answer.signal["type"], "answer");
        }
        other => panic!("expected answer, got {other:?}"),
    }

    let link = transport.latest(c).unwrap();
    link.stream_arrived();
    link.stream_arrived();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::StreamAdded(_))).await,
        SessionEvent::StreamAdded(c)
    );

    handle.leave().await.unwrap();
    task.await.unwrap().unwrap();
    let streams: Vec<SessionEvent> = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, SessionEvent::StreamAdded(_)))
        .collect();
    assert!(streams.is_empty(), "duplicate stream events: {streams:?}");
}

/// Losing the relay connection closes every link, then rejoins.
#[tokio::test]
async fn test_reconnect_discards_links_and_rejoins() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut first = connector.accept_next();
    let mut second = connector.accept_next();
    let (handle, mut events, task) = MeshSession::spawn(
        config(),
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    expect_join(&mut first).await;
    let a = ConnectionId::new();
    first.send(ServerMessage::PermissionGranted).await;
    first.send(ServerMessage::AllUsers(vec![peer(a, "A")])).await;
    assert!(matches!(first.recv().await, ClientMessage::Offer(_)));

    first.disconnect();
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::Reconnecting { .. })).await,
        SessionEvent::Reconnecting { attempt: 1 }
    );
    assert_eq!(transport.latest(a).unwrap().close_count(), 1);

    expect_join(&mut second).await;
    assert_eq!(connector.attempts(), 2);

    // The rebuilt mesh starts from the new all-users list.
    second.send(ServerMessage::PermissionGranted).await;
    second.send(ServerMessage::AllUsers(vec![peer(a, "A")])).await;
    assert!(matches!(second.recv().await, ClientMessage::Offer(_)));
    assert_eq!(transport.links_for(a).len(), 2);

    handle.leave().await.unwrap();
    assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
}

/// Peers that never deliver media are swept by the session's timer.
#[tokio::test(start_paused = true)]
async fn test_session_sweeps_ghost_peers() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut relay = connector.accept_next();
    let config = config()
        .with_ghost_grace(Duration::from_secs(2))
        .with_ghost_sweep_interval(Duration::from_secs(1));
    let (handle, mut events, task) = MeshSession::spawn(
        config,
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    expect_join(&mut relay).await;
    let ghost = ConnectionId::new();
    relay.send(ServerMessage::PermissionGranted).await;
    relay.send(ServerMessage::AllUsers(vec![peer(ghost, "Ghost")])).await;
    assert!(matches!(relay.recv().await, ClientMessage::Offer(_)));

    let removed =
        wait_for(&mut events, |e| matches!(e, SessionEvent::PeerRemoved { .. })).await;
    assert_eq!(
        removed,
        SessionEvent::PeerRemoved {
            peer_id: ghost,
            reason: RemovalReason::Ghost,
        }
    );
    assert_eq!(transport.latest(ghost).unwrap().close_count(), 1);

    handle.leave().await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(transport.total_closes(), 1);
}

/// Status from peers updates the board; host recording toggles the indicator.
#[tokio::test]
async fn test_status_events_and_recording() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut relay = connector.accept_next();
    let (handle, mut events, task) = MeshSession::spawn(
        config(),
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    expect_join(&mut relay).await;
    let host = ConnectionId::new();
    relay
        .send(ServerMessage::PeerStatus(PeerStatus {
            from: host,
            payload: StatusUpdate::new().recording(true).into_payload(),
        }))
        .await;

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::StatusChanged(_))).await,
        SessionEvent::StatusChanged(host)
    );
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        SessionEvent::RecordingChanged(true)
    );

    // Outgoing status carries the configured room.
    handle
        .broadcast_status(StatusUpdate::new().hand_raised(true).into_payload())
        .await
        .unwrap();
    match relay.recv().await {
        ClientMessage::BroadcastStatus(update) => {
            assert_eq!(update.room_id, RoomId::from(ROOM));
            assert_eq!(update.payload.get("handRaised"), Some(&json!(true)));
        }
        other => panic!("expected broadcast-status, got {other:?}"),
    }

    handle.leave().await.unwrap();
    task.await.unwrap().unwrap();
}

/// A host decides on waiting peers and can end the meeting.
#[tokio::test]
async fn test_host_commands() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let mut relay = connector.accept_next();
    let (handle, mut events, task) = MeshSession::spawn(
        config().as_host(),
        connector.clone(),
        transport.clone(),
        CancellationToken::new(),
    );

    match relay.recv().await {
        ClientMessage::JoinRoom(join) => assert!(join.is_host),
        other => panic!("expected join-room, got {other:?}"),
    }
    relay.send(ServerMessage::MeetingInfo(code())).await;
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        SessionEvent::Hosting(code().meeting_id)
    );

    let guest = ConnectionId::new();
    relay
        .send(ServerMessage::PermissionRequested(PermissionRequest {
            peer_id: guest,
            name: "Guest".to_string(),
        }))
        .await;
    assert_eq!(
        wait_for(&mut events, |_| true).await,
        SessionEvent::PermissionRequested {
            peer_id: guest,
            name: "Guest".to_string(),
        }
    );

    handle.decide(guest, false).await.unwrap();
    match relay.recv().await {
        ClientMessage::GivePermission(decision) => {
            assert_eq!(decision.peer_id, guest);
            assert!(!decision.approved);
        }
        other => panic!("expected give-permission, got {other:?}"),
    }

    handle.end_meeting().await.unwrap();
    assert!(matches!(relay.recv().await, ClientMessage::EndMeeting(_)));
    assert_eq!(task.await.unwrap().unwrap(), SessionExit::MeetingEnded);
}

/// Cancelling the token stops the session, even mid-backoff.
#[tokio::test]
async fn test_cancel_stops_reconnecting_session() {
    let connector = MockConnector::new();
    let transport = MockTransport::new();
    let cancel = CancellationToken::new();
    let config = config()
        .with_max_reconnect_attempts(100)
        .with_reconnect_backoff(Duration::from_secs(60), Duration::from_secs(60));
    let (_handle, mut events, task) = MeshSession::spawn(
        config,
        connector.clone(),
        transport.clone(),
        cancel.clone(),
    );

    assert_eq!(
        wait_for(&mut events, |_| true).await,
        SessionEvent::Reconnecting { attempt: 1 }
    );
    cancel.cancel();
    assert_eq!(task.await.unwrap().unwrap(), SessionExit::Left);
    assert_eq!(connector.attempts(), 1);
}
