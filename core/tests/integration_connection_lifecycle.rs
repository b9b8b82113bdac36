//! Connection lifecycle across whole sessions
//!
//! Run with: cargo test --test integration_connection_lifecycle

mod common;

use common::{next_event, peer, Peer};
use ghostlink_core::message::{SenderInfo, WireEnvelope};
use ghostlink_core::transport::{ConnectionState, PeerTransport};
use ghostlink_core::{
    CoreError, MemoryNetwork, Session, SessionEvent, SessionSettings, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_connect_opens_both_sides() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;
    let mut bob = peer(&network, "bob").await;

    let room = alice.session.open_direct(&bob.id).await.unwrap();
    assert_eq!(room.id, format!("direct-{}", bob.id));
    assert!(room.is_connected);
    assert!(alice.session.is_connected(&bob.id));

    match next_event(&mut bob.events, |e| matches!(e, SessionEvent::PeerConnected { .. })).await {
        SessionEvent::PeerConnected { peer_id, metadata } => {
            assert_eq!(peer_id, alice.id);
            assert_eq!(metadata.unwrap().nickname, "alice");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(bob.session.is_connected(&alice.id));
}

#[tokio::test]
async fn test_second_connect_reuses_channel() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;
    let bob = peer(&network, "bob").await;

    alice.session.open_direct(&bob.id).await.unwrap();
    alice.session.open_direct(&bob.id).await.unwrap();

    assert_eq!(network.dial_count(&alice.id, &bob.id), 1);
    assert_eq!(alice.session.rooms().len(), 1);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_dial() {
    let network = MemoryNetwork::new();
    network.set_dial_latency(Duration::from_millis(50));
    let alice = peer(&network, "alice").await;
    let bob = peer(&network, "bob").await;

    let (first, second, third) = tokio::join!(
        alice.session.open_direct(&bob.id),
        alice.session.open_direct(&bob.id),
        alice.session.open_direct(&bob.id),
    );

    assert!(first.is_ok() && second.is_ok() && third.is_ok());
    assert_eq!(network.dial_count(&alice.id, &bob.id), 1);
}

#[tokio::test]
async fn test_connect_to_unknown_peer_fails() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;

    let result = alice.session.open_direct("turtle-deadbeef").await;
    assert_eq!(result, Err(CoreError::Unreachable("turtle-deadbeef".into())));
    assert!(alice.session.rooms().is_empty());
}

#[tokio::test]
async fn test_directory_offline_fails_start() {
    let network = MemoryNetwork::new();
    network.set_directory_online(false);

    let media = common::RecordingMedia::new("alice");
    let (session, _events) = Session::new(
        Arc::new(network.backend()),
        media,
        SessionSettings::new("alice"),
    )
    .unwrap();

    assert!(matches!(
        session.start().await,
        Err(CoreError::Transport(TransportError::Connect(_)))
    ));
    assert!(session.local_peer_id().is_none());
}

#[tokio::test]
async fn test_second_start_rejected() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;

    assert_eq!(
        alice.session.start().await,
        Err(CoreError::Transport(TransportError::AlreadyInitialized))
    );
}

#[tokio::test]
async fn test_invalid_settings_rejected() {
    let network = MemoryNetwork::new();
    let media = common::RecordingMedia::new("");
    let result = Session::new(Arc::new(network.backend()), media, SessionSettings::new(""));
    assert!(matches!(result, Err(CoreError::Settings(_))));
}

#[tokio::test]
async fn test_drop_marks_rooms_disconnected() {
    let network = MemoryNetwork::new();
    let mut alice = peer(&network, "alice").await;
    let bob = peer(&network, "bob").await;

    let room = alice.session.open_direct(&bob.id).await.unwrap();
    network.disconnect(&alice.id, &bob.id);

    next_event(&mut alice.events, |e| {
        matches!(e, SessionEvent::RoomStatusChanged { connected: false, .. })
    })
    .await;
    next_event(&mut alice.events, |e| matches!(e, SessionEvent::PeerDisconnected(_))).await;

    assert!(!alice.session.room(&room.id).unwrap().is_connected);
    assert!(!alice.session.is_connected(&bob.id));

    // Nothing is queued for a closed channel
    let report = alice.session.send(&room.id, "anyone there?").unwrap();
    assert_eq!(report.handed_off, 0);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_manual_reconnect() {
    let network = MemoryNetwork::new();
    let mut alice = peer(&network, "alice").await;
    let bob = peer(&network, "bob").await;

    let room = alice.session.open_direct(&bob.id).await.unwrap();
    network.disconnect(&alice.id, &bob.id);
    next_event(&mut alice.events, |e| matches!(e, SessionEvent::PeerDisconnected(_))).await;

    assert!(alice.session.reconnect(&room.id).await.unwrap());
    assert!(alice.session.room(&room.id).unwrap().is_connected);
    assert_eq!(network.dial_count(&alice.id, &bob.id), 2);

    assert!(matches!(
        alice.session.reconnect("direct-nobody").await,
        Err(CoreError::UnknownRoom(_))
    ));
}

#[tokio::test]
async fn test_registry_generations_and_closed_sends() {
    let network = MemoryNetwork::new();
    let (alice, _alice_events) = PeerTransport::new(Arc::new(network.backend()));
    let (bob, _bob_events) = PeerTransport::new(Arc::new(network.backend()));
    alice.initialize(SenderInfo::new("alice"), false).await.unwrap();
    let bob_id = bob.initialize(SenderInfo::new("bob"), false).await.unwrap();

    assert!(alice.connect(&bob_id, SenderInfo::new("alice")).await);
    let first = alice.registry().connection(&bob_id).unwrap().generation;

    alice.disconnect(&bob_id).await;
    assert_eq!(alice.registry().state(&bob_id), Some(ConnectionState::Closed));
    assert_eq!(
        alice.send(&bob_id, WireEnvelope::chat("late", SenderInfo::new("alice"))),
        Err(TransportError::ChannelNotOpen(bob_id.clone()))
    );

    assert!(alice.connect(&bob_id, SenderInfo::new("alice")).await);
    let second = alice.registry().connection(&bob_id).unwrap().generation;
    assert!(second > first);
    assert_eq!(alice.registry().state(&bob_id), Some(ConnectionState::Open));
}

#[tokio::test]
async fn test_anonymize_switch_gets_new_identity() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;
    let mut bob: Peer = peer(&network, "bob").await;

    alice.session.open_direct(&bob.id).await.unwrap();
    let old_id = alice.id.clone();

    let new_id = alice.session.set_anonymize(true).await.unwrap();
    assert_ne!(new_id, old_id);
    assert!(new_id.starts_with("ghost-"));
    assert!(alice.session.is_anonymized());
    assert!(network.is_relayed(&new_id));
    assert!(!network.is_registered(&old_id));

    // Existing channels were closed on both sides
    assert!(!alice.session.is_connected(&bob.id));
    match next_event(&mut bob.events, |e| matches!(e, SessionEvent::PeerDisconnected(_))).await {
        SessionEvent::PeerDisconnected(peer_id) => assert_eq!(peer_id, old_id),
        other => panic!("unexpected {other:?}"),
    }

    // Setting the same value again is a no-op
    assert_eq!(alice.session.set_anonymize(true).await.unwrap(), new_id);
}

#[tokio::test]
async fn test_shutdown_leaves_directory() {
    let network = MemoryNetwork::new();
    let alice = peer(&network, "alice").await;
    let mut bob = peer(&network, "bob").await;
    alice.session.open_direct(&bob.id).await.unwrap();

    alice.session.shutdown().await;

    assert!(!network.is_registered(&alice.id));
    assert!(alice.session.local_peer_id().is_none());
    next_event(&mut bob.events, |e| matches!(e, SessionEvent::PeerDisconnected(_))).await;
}
