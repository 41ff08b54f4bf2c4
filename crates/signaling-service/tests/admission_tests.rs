//! Room admission integration tests.
//!
//! Drives whole sessions through `TestRelay` / `TestClient`: host-gated
//! admission, denial, departures and room dissolution.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use common::protocol::{PeerDeparture, PeerSummary, ServerMessage};
use common::types::RoomId;
use serde_json::json;
use signaling_service::errors::SignalingError;
use signaling_test_utils::{all_users_ids, TestClient, TestRelay};

const ROOM: &str = "0xroom";

/// Host joins and a guest is admitted; returns (relay, host, guest) with all
/// mailboxes drained.
async fn admitted_pair() -> (TestRelay, TestClient, TestClient) {
    let relay = TestRelay::new();
    let mut host = relay.client().await;
    let mut guest = relay.client().await;

    host.join(ROOM, "Host", true).await;
    guest.join(ROOM, "Guest", false).await;
    host.decide(ROOM, guest.id(), true).await;

    host.drain();
    guest.drain();
    (relay, host, guest)
}

/// Host H joins, guest G waits, H approves, G sees H, H sees G, and an
/// offer/answer pair travels through the relay.
#[tokio::test]
async fn test_host_admits_guest_and_negotiation_flows() {
    let relay = TestRelay::new();
    let mut host = relay.client().await;
    let mut guest = relay.client().await;

    host.join(ROOM, "Host", true).await;
    let code = match host.recv().await {
        ServerMessage::MeetingInfo(info) => info.meeting_id,
        other => panic!("expected meeting-info, got {other:?}"),
    };
    assert!(all_users_ids(&host.recv().await).is_empty());

    guest.join(ROOM, "Guest", false).await;
    match guest.recv().await {
        ServerMessage::WaitingForPermission(info) => assert_eq!(info.meeting_id, code),
        other => panic!("expected waiting-for-permission, got {other:?}"),
    }
    match host.recv().await {
        ServerMessage::PermissionRequested(request) => {
            assert_eq!(request.peer_id, guest.id());
            assert_eq!(request.name, "Guest");
        }
        other => panic!("expected permission-requested, got {other:?}"),
    }

    host.decide(ROOM, guest.id(), true).await;
    assert_eq!(guest.recv().await, ServerMessage::PermissionGranted);
    assert_eq!(all_users_ids(&guest.recv().await), vec![host.id()]);
    assert_eq!(
        host.recv().await,
        ServerMessage::UserJoined(PeerSummary {
            id: guest.id(),
            name: "Guest".to_string(),
        })
    );

    // The guest initiates towards everyone in its all-users list.
    guest.offer(host.id(), json!({"type": "offer", "sdp": "v=0"})).await;
    match host.recv().await {
        ServerMessage::Offer(offer) => {
            assert_eq!(offer.caller_id, guest.id());
            assert_eq!(offer.signal["sdp"], "v=0");
        }
        other => panic!("expected offer, got {other:?}"),
    }

    host.answer(guest.id(), json!({"type": "answer"})).await;
    match guest.recv().await {
        ServerMessage::Answer(answer) => assert_eq!(answer.id, host.id()),
        other => panic!("expected answer, got {other:?}"),
    }

    host.close().await;
    guest.close().await;
    relay.shutdown();
}

/// A denied guest never shows up in a later all-users list.
#[tokio::test]
async fn test_denied_guest_never_listed() {
    let relay = TestRelay::new();
    let mut host = relay.client().await;
    let mut denied = relay.client().await;
    let mut later = relay.client().await;

    host.join(ROOM, "Host", true).await;
    denied.join(ROOM, "Mallory", false).await;
    host.decide(ROOM, denied.id(), false).await;

    let events = denied.drain();
    assert_eq!(events.last(), Some(&ServerMessage::PermissionDenied));

    // Asking again is refused without bothering the host.
    host.drain();
    denied.join(ROOM, "Mallory", false).await;
    assert_eq!(denied.recv().await, ServerMessage::PermissionDenied);
    host.assert_idle();

    later.join(ROOM, "Later", false).await;
    host.decide(ROOM, later.id(), true).await;
    let events = later.drain();
    let listed: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, ServerMessage::AllUsers(_)))
        .flat_map(all_users_ids)
        .collect();
    assert_eq!(listed, vec![host.id()]);
    assert!(!listed.contains(&denied.id()));

    let snapshot = relay
        .registry()
        .get_room(RoomId::from(ROOM))
        .await
        .unwrap()
        .handle
        .get_state()
        .await
        .unwrap();
    assert_eq!(snapshot.denied_count, 1);

    host.close().await;
    denied.close().await;
    later.close().await;
    relay.shutdown();
}

/// A denied connection claiming host authority is still refused, and never
/// appears in anyone's all-users list.
#[tokio::test]
async fn test_denied_guest_cannot_rejoin_as_host() {
    let relay = TestRelay::new();
    let mut host = relay.client().await;
    let mut denied = relay.client().await;
    let mut later = relay.client().await;

    host.join(ROOM, "Host", true).await;
    denied.join(ROOM, "Mallory", false).await;
    host.decide(ROOM, denied.id(), false).await;
    denied.drain();
    host.drain();

    denied.join(ROOM, "Mallory", true).await;
    assert_eq!(denied.recv().await, ServerMessage::PermissionDenied);
    denied.assert_idle();
    host.assert_idle();

    let snapshot = relay
        .registry()
        .get_room(RoomId::from(ROOM))
        .await
        .unwrap()
        .handle
        .get_state()
        .await
        .unwrap();
    assert_eq!(snapshot.host_id, Some(host.id()));
    assert!(!snapshot.is_member(denied.id()));

    later.join(ROOM, "Later", false).await;
    host.decide(ROOM, later.id(), true).await;
    let listed: Vec<_> = later
        .drain()
        .iter()
        .filter(|event| matches!(event, ServerMessage::AllUsers(_)))
        .flat_map(all_users_ids)
        .collect();
    assert_eq!(listed, vec![host.id()]);

    host.close().await;
    denied.close().await;
    later.close().await;
    relay.shutdown();
}

/// Host leaves mid-session: the remaining member is told, the room keeps
/// running without a host.
#[tokio::test]
async fn test_host_departure_leaves_room_without_host() {
    let (relay, host, mut guest) = admitted_pair().await;
    let host_id = host.id();

    host.close().await;
    assert_eq!(
        guest.recv().await,
        ServerMessage::UserLeft(PeerDeparture {
            id: host_id,
            name: Some("Host".to_string()),
        })
    );

    let entry = relay.registry().get_room(RoomId::from(ROOM)).await.unwrap();
    let snapshot = entry.handle.get_state().await.unwrap();
    assert_eq!(snapshot.host_id, None);
    assert_eq!(snapshot.members.len(), 1);

    guest.close().await;
    relay.shutdown();
}

/// Members and pending never overlap, and a host is never pending.
#[tokio::test]
async fn test_members_and_pending_are_disjoint() {
    let relay = TestRelay::new();
    let mut guest = relay.client().await;
    let mut host = relay.client().await;
    let mut other = relay.client().await;

    // Guest arrives before any host.
    guest.join(ROOM, "Early", false).await;
    host.join(ROOM, "Host", true).await;
    other.join(ROOM, "Other", false).await;

    let handle = relay
        .registry()
        .get_room(RoomId::from(ROOM))
        .await
        .unwrap()
        .handle;
    let check = |snapshot: &signaling_service::actors::RoomSnapshot| {
        for member in &snapshot.members {
            assert!(
                snapshot.pending.iter().all(|pending| pending.id != member.id),
                "{} is both member and pending",
                member.id
            );
        }
        if let Some(host_id) = snapshot.host_id {
            assert!(snapshot.pending.iter().all(|pending| pending.id != host_id));
        }
    };

    let snapshot = handle.get_state().await.unwrap();
    check(&snapshot);
    assert_eq!(snapshot.pending.len(), 2);

    host.decide(ROOM, guest.id(), true).await;
    let snapshot = handle.get_state().await.unwrap();
    check(&snapshot);
    assert_eq!(snapshot.members.len(), 2);
    assert_eq!(snapshot.pending.len(), 1);

    // A pending guest claiming host jumps straight to member.
    other.join(ROOM, "Other", true).await;
    let snapshot = handle.get_state().await.unwrap();
    check(&snapshot);
    assert_eq!(snapshot.pending.len(), 0);
    assert_eq!(snapshot.host_id, Some(other.id()));

    for client in [guest, host, other] {
        client.close().await;
    }
    relay.shutdown();
}

/// The late host is asked about everyone already waiting.
#[tokio::test]
async fn test_late_host_sees_waiting_guests() {
    let relay = TestRelay::new();
    let mut first = relay.client().await;
    let mut second = relay.client().await;
    let mut host = relay.client().await;

    first.join(ROOM, "First", false).await;
    second.join(ROOM, "Second", false).await;
    host.join(ROOM, "Host", true).await;

    let requested: Vec<_> = host
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ServerMessage::PermissionRequested(request) => Some(request.peer_id),
            _ => None,
        })
        .collect();
    assert_eq!(requested, vec![first.id(), second.id()]);

    for client in [first, second, host] {
        client.close().await;
    }
    relay.shutdown();
}

/// Status goes to every other member and never back to the sender; only the
/// host may set the recording flag.
#[tokio::test]
async fn test_status_fan_out() {
    let (relay, mut host, mut guest) = admitted_pair().await;

    let mut payload = serde_json::Map::new();
    payload.insert("handRaised".to_string(), json!(true));
    payload.insert("recording".to_string(), json!(true));
    guest.broadcast(ROOM, payload).await;

    match host.recv().await {
        ServerMessage::PeerStatus(status) => {
            assert_eq!(status.from, guest.id());
            assert_eq!(status.payload.get("handRaised"), Some(&json!(true)));
            assert!(status.payload.get("recording").is_none());
        }
        other => panic!("expected peer-status, got {other:?}"),
    }
    guest.assert_idle();

    let mut payload = serde_json::Map::new();
    payload.insert("recording".to_string(), json!(true));
    host.broadcast(ROOM, payload).await;
    match guest.recv().await {
        ServerMessage::PeerStatus(status) => {
            assert_eq!(status.payload.get("recording"), Some(&json!(true)));
        }
        other => panic!("expected peer-status, got {other:?}"),
    }
    host.assert_idle();

    host.close().await;
    guest.close().await;
    relay.shutdown();
}

/// Pending peers do not see or send status.
#[tokio::test]
async fn test_pending_peer_status_is_ignored() {
    let (relay, mut host, mut guest) = admitted_pair().await;
    let mut waiting = relay.client().await;
    waiting.join(ROOM, "Waiting", false).await;
    waiting.drain();
    host.drain();

    let mut payload = serde_json::Map::new();
    payload.insert("audioOn".to_string(), json!(false));
    waiting.broadcast(ROOM, payload.clone()).await;
    host.assert_idle();
    guest.assert_idle();

    guest.broadcast(ROOM, payload).await;
    assert!(matches!(host.recv().await, ServerMessage::PeerStatus(_)));
    waiting.assert_idle();

    for client in [host, guest, waiting] {
        client.close().await;
    }
    relay.shutdown();
}

/// Ending the meeting reaches members and pending peers alike.
#[tokio::test]
async fn test_end_meeting_reaches_everyone() {
    let (relay, mut host, mut guest) = admitted_pair().await;
    let mut waiting = relay.client().await;
    waiting.join(ROOM, "Waiting", false).await;
    waiting.drain();
    host.drain();

    // Guests cannot end it.
    guest.end_meeting(ROOM).await;
    match guest.recv().await {
        ServerMessage::Error(notice) => assert_eq!(notice.code, 3),
        other => panic!("expected error, got {other:?}"),
    }

    host.end_meeting(ROOM).await;
    assert_eq!(guest.recv().await, ServerMessage::MeetingEnded);
    assert_eq!(waiting.recv().await, ServerMessage::MeetingEnded);
    host.assert_idle();

    let result = relay.registry().get_room(RoomId::from(ROOM)).await;
    assert!(matches!(result, Err(SignalingError::RoomNotFound(_))));

    for client in [host, guest, waiting] {
        client.close().await;
    }
    relay.shutdown();
}

/// Once everyone leaves, neither the room nor its code resolve.
#[tokio::test]
async fn test_empty_room_is_unresolvable() {
    let (relay, host, guest) = admitted_pair().await;
    let code = relay
        .registry()
        .get_room(RoomId::from(ROOM))
        .await
        .unwrap()
        .display_code;

    host.close().await;
    guest.close().await;

    let result = relay.registry().get_room(RoomId::from(ROOM)).await;
    assert!(matches!(result, Err(SignalingError::RoomNotFound(_))));
    assert_eq!(
        relay
            .registry()
            .resolve_display_code(code.as_str())
            .await
            .unwrap(),
        None
    );

    relay.shutdown();
}

/// A guest may join by display code and keep using the code as room key.
#[tokio::test]
async fn test_join_by_display_code() {
    let relay = TestRelay::new();
    let mut host = relay.client().await;
    let mut guest = relay.client().await;

    host.join(ROOM, "Host", true).await;
    let code = match host.recv().await {
        ServerMessage::MeetingInfo(info) => info.meeting_id,
        other => panic!("expected meeting-info, got {other:?}"),
    };
    host.drain();

    guest.join(code.as_str(), "Guest", false).await;
    assert!(matches!(
        guest.recv().await,
        ServerMessage::WaitingForPermission(_)
    ));
    host.decide(ROOM, guest.id(), true).await;
    guest.drain();
    host.drain();

    let mut payload = serde_json::Map::new();
    payload.insert("speaking".to_string(), json!(true));
    guest.broadcast(code.as_str(), payload).await;
    assert!(matches!(host.recv().await, ServerMessage::PeerStatus(_)));

    host.close().await;
    guest.close().await;
    relay.shutdown();
}

/// A full room refuses newcomers with a capacity error.
#[tokio::test]
async fn test_full_room_rejects_join() {
    let relay = TestRelay::builder().max_room_members(2).build();
    let mut host = relay.client().await;
    let mut guest = relay.client().await;
    let mut extra = relay.client().await;

    host.join(ROOM, "Host", true).await;
    guest.join(ROOM, "Guest", false).await;
    extra.join(ROOM, "Extra", false).await;

    match extra.recv().await {
        ServerMessage::Error(notice) => assert_eq!(notice.code, 7),
        other => panic!("expected error, got {other:?}"),
    }

    for client in [host, guest, extra] {
        client.close().await;
    }
    relay.shutdown();
}
