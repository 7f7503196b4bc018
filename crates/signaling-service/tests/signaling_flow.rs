//! End-to-end dispatcher tests against the mock media engine.
//!
//! Covers:
//! - Lazy, race-free room creation
//! - Consume fan-out over compatible producers
//! - Lookup failures and their single error reply
//! - close-room notification and teardown
//! - Disconnect cleanup leaving media state alone
//! - Engine failures leaving no partial room state

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use signaling_service::protocol::ServerMessage;
use signaling_test_utils::{fixtures, MediaKind, MockMediaEngine, SignalingHarness};

// ============================================================================
// Room creation
// ============================================================================

#[tokio::test]
async fn test_concurrent_get_or_create_builds_one_router() {
    let engine = MockMediaEngine::builder()
        .with_router_delay(Duration::from_millis(20))
        .build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = harness.registry().clone();
        tasks.push(tokio::spawn(async move {
            let room = registry.get_or_create("room-1").await.unwrap();
            room.rtp_capabilities().await.unwrap();
            room
        }));
    }

    let mut router_ids = HashSet::new();
    for task in tasks {
        let room = task.await.unwrap();
        assert_eq!(room.room_id(), "room-1");
        router_ids.insert(room.get_state().await.unwrap().router_id);
    }

    assert_eq!(router_ids.len(), 1);
    assert_eq!(engine.routers_created(), 1);
}

#[tokio::test]
async fn test_concurrent_peers_share_capabilities() {
    let engine = MockMediaEngine::builder()
        .with_router_delay(Duration::from_millis(20))
        .build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));

    let mut peers: Vec<_> = (0..8).map(|_| harness.peer()).collect();
    let payload = fixtures::get_rtp_capabilities("room-1");
    futures_util::future::join_all(peers.iter().map(|peer| peer.send(&payload))).await;

    let mut first = None;
    for peer in &mut peers {
        let ServerMessage::RtpCapabilities { rtp_capabilities } = peer.recv().await else {
            panic!("expected rtp-capabilities");
        };
        let expected = first.get_or_insert_with(|| rtp_capabilities.clone());
        assert_eq!(*expected, rtp_capabilities);
    }
    assert_eq!(engine.routers_created(), 1);
}

// ============================================================================
// Consume
// ============================================================================

#[tokio::test]
async fn test_consume_replies_once_per_compatible_producer() {
    let engine = MockMediaEngine::builder().deny_consume_of("p2").build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));
    let mut publisher = harness.peer();
    let mut viewer = harness.peer();

    let send_transport = publisher.create_transport("room-1").await;
    let p1 = publisher
        .produce("room-1", &send_transport, MediaKind::Audio)
        .await;
    let p2 = publisher
        .produce("room-1", &send_transport, MediaKind::Video)
        .await;
    let p3 = publisher
        .produce("room-1", &send_transport, MediaKind::Audio)
        .await;
    assert_eq!(p2, "p2");

    let recv_transport = viewer.create_transport("room-1").await;
    viewer
        .send(&fixtures::consume("room-1", &recv_transport))
        .await;

    let mut consumed = Vec::new();
    for _ in 0..2 {
        match viewer.recv().await {
            ServerMessage::ConsumerCreated {
                producer_id, kind, ..
            } => consumed.push((producer_id, kind)),
            other => panic!("expected consumer-created, got {other:?}"),
        }
    }
    viewer.assert_silent().await;

    // Registration order
    assert_eq!(
        consumed,
        vec![(p1, MediaKind::Audio), (p3, MediaKind::Audio)]
    );
    assert_eq!(engine.consumer_count(), 2);
    publisher.assert_silent().await;
}

#[tokio::test]
async fn test_consume_with_no_producers_is_silent() {
    let harness = SignalingHarness::new();
    let mut viewer = harness.peer();

    let transport_id = viewer.create_transport("room-1").await;
    viewer.send(&fixtures::consume("room-1", &transport_id)).await;

    viewer.assert_silent().await;
    assert_eq!(harness.engine.call_count("consume"), 0);
}

#[tokio::test]
async fn test_consume_skips_incompatible_kind() {
    let engine = MockMediaEngine::builder()
        .deny_consume_kind(MediaKind::Video)
        .build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));
    let mut publisher = harness.peer();
    let mut viewer = harness.peer();

    let send_transport = publisher.create_transport("room-1").await;
    publisher
        .produce("room-1", &send_transport, MediaKind::Video)
        .await;
    let audio = publisher
        .produce("room-1", &send_transport, MediaKind::Audio)
        .await;

    let recv_transport = viewer.create_transport("room-1").await;
    viewer
        .send(&fixtures::consume("room-1", &recv_transport))
        .await;

    let reply = viewer.recv_json().await;
    assert_eq!(reply["type"], "consumer-created");
    assert_eq!(reply["producerId"], audio.as_str());
    assert_eq!(reply["kind"], "audio");
    viewer.assert_silent().await;
}

#[tokio::test]
async fn test_unread_consumer_does_not_stall_room() {
    let harness = SignalingHarness::new();
    let mut publisher = harness.peer();
    let mut other = harness.peer();
    let mut slow = harness.peer_with_buffer(1);

    let send_transport = publisher.create_transport("room-1").await;
    for _ in 0..3 {
        publisher
            .produce("room-1", &send_transport, MediaKind::Video)
            .await;
    }
    let recv_transport = slow.create_transport("room-1").await;

    // Three replies into a queue of one that is never read
    let payload = fixtures::consume("room-1", &recv_transport);
    let stalled = tokio::spawn(async move {
        slow.send(&payload).await;
        slow
    });

    tokio::time::timeout(
        Duration::from_secs(2),
        other.send(&fixtures::get_rtp_capabilities("room-1")),
    )
    .await
    .expect("room should keep serving other connections");
    assert!(matches!(
        other.recv().await,
        ServerMessage::RtpCapabilities { .. }
    ));

    tokio::time::timeout(
        Duration::from_secs(2),
        publisher.send(&fixtures::close_room("room-1")),
    )
    .await
    .expect("close-room should not wait on the slow consumer");
    assert!(harness.registry().get("room-1").await.unwrap().is_none());
    assert_eq!(harness.engine.closed_routers(), vec!["r1".to_string()]);

    // Only the slow connection's own stream is held up
    assert!(!stalled.is_finished());
    stalled.abort();
}

// ============================================================================
// Lookup failures
// ============================================================================

#[tokio::test]
async fn test_missing_room_id_gets_single_error() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();

    peer.send(&json!({ "type": "create-transport" }).to_string())
        .await;

    peer.expect_error("No room ID provided").await;
    peer.assert_silent().await;
    assert!(harness.engine.calls().is_empty());
}

#[tokio::test]
async fn test_connect_transport_on_unknown_room() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();

    peer.send(&fixtures::connect_transport("ghost-room", "t1"))
        .await;

    peer.expect_error("Room not found").await;
    peer.assert_silent().await;
    assert!(harness.registry().get("ghost-room").await.unwrap().is_none());
    assert!(harness.engine.calls().is_empty());
}

#[tokio::test]
async fn test_produce_on_unknown_room() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();

    peer.send(&fixtures::produce("ghost-room", "t1", MediaKind::Audio))
        .await;

    peer.expect_error("Room not found").await;
    peer.assert_silent().await;
    assert!(harness.registry().get("ghost-room").await.unwrap().is_none());
    assert_eq!(harness.engine.producer_count(), 0);
}

#[tokio::test]
async fn test_produce_on_unknown_transport() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();
    peer.create_transport("room-1").await;

    peer.send(&fixtures::produce("room-1", "t-missing", MediaKind::Audio))
        .await;

    peer.expect_error("Transport not found").await;
    peer.assert_silent().await;
    assert_eq!(harness.engine.call_count("produce"), 0);
}

#[tokio::test]
async fn test_transport_from_another_room_is_not_found() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();
    let other_room_transport = peer.create_transport("room-a").await;
    peer.create_transport("room-b").await;

    peer.send(&fixtures::consume("room-b", &other_room_transport))
        .await;

    peer.expect_error("Transport not found").await;
}

#[tokio::test]
async fn test_errors_do_not_end_the_session() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();

    peer.send("not json at all").await;
    peer.send(&fixtures::produce("nowhere", "t1", MediaKind::Audio))
        .await;
    peer.expect_error("Room not found").await;

    peer.send(&fixtures::get_rtp_capabilities("room-1")).await;
    assert!(matches!(
        peer.recv().await,
        ServerMessage::RtpCapabilities { .. }
    ));
}

// ============================================================================
// close-room
// ============================================================================

#[tokio::test]
async fn test_close_room_notifies_other_members_only() {
    let harness = SignalingHarness::new();
    let mut host = harness.peer();
    let mut viewer_a = harness.peer();
    let mut viewer_b = harness.peer();
    let mut outsider = harness.peer();

    let transport_id = host.create_transport("room-1").await;
    host.produce("room-1", &transport_id, MediaKind::Video).await;
    for viewer in [&mut viewer_a, &mut viewer_b] {
        viewer.send(&fixtures::get_rtp_capabilities("room-1")).await;
        viewer.recv().await;
    }
    outsider.send(&fixtures::get_rtp_capabilities("room-2")).await;
    outsider.recv().await;

    host.send(&fixtures::close_room("room-1")).await;

    assert_eq!(viewer_a.recv().await, ServerMessage::StreamStopped);
    assert_eq!(viewer_b.recv().await, ServerMessage::StreamStopped);
    host.assert_silent().await;
    outsider.assert_silent().await;

    assert!(harness.registry().get("room-1").await.unwrap().is_none());
    assert!(harness.registry().get("room-2").await.unwrap().is_some());
    assert_eq!(harness.engine.closed_routers(), vec!["r1".to_string()]);
    assert!(harness
        .dispatcher
        .membership()
        .members("room-1")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_close_room_reaches_member_with_full_queue() {
    let harness = SignalingHarness::new();
    let mut host = harness.peer();
    let mut viewer = harness.peer_with_buffer(1);

    host.create_transport("room-1").await;
    // Reply left unread, so the viewer's queue is full
    viewer.send(&fixtures::get_rtp_capabilities("room-1")).await;

    tokio::time::timeout(
        Duration::from_secs(2),
        host.send(&fixtures::close_room("room-1")),
    )
    .await
    .expect("close-room should not wait on a full member");

    assert!(matches!(
        viewer.recv().await,
        ServerMessage::RtpCapabilities { .. }
    ));
    assert_eq!(viewer.recv().await, ServerMessage::StreamStopped);
    assert_eq!(harness.metrics.outbound_dropped(), 0);
    assert!(harness.registry().get("room-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_room_is_fresh_after_close() {
    let harness = SignalingHarness::new();
    let mut host = harness.peer();

    let old_transport = host.create_transport("room-1").await;
    host.send(&fixtures::close_room("room-1")).await;

    let new_transport = host.create_transport("room-1").await;
    assert_ne!(old_transport, new_transport);
    assert_eq!(harness.engine.routers_created(), 2);

    // Old transport died with the old room
    host.send(&fixtures::produce("room-1", &old_transport, MediaKind::Audio))
        .await;
    host.expect_error("Transport not found").await;

    let room = harness.registry().get("room-1").await.unwrap().unwrap();
    let snapshot = room.get_state().await.unwrap();
    assert_eq!(snapshot.router_id.as_deref(), Some("r2"));
    assert_eq!(snapshot.transport_ids, vec![new_transport]);
}

#[tokio::test]
async fn test_close_room_without_media_still_notifies() {
    let harness = SignalingHarness::new();
    let mut host = harness.peer();
    let mut viewer = harness.peer();

    // Both are members, but no media room exists
    viewer.send(&json!({ "type": "hello", "roomId": "room-1" }).to_string())
        .await;
    host.send(&fixtures::close_room("room-1")).await;

    assert_eq!(viewer.recv().await, ServerMessage::StreamStopped);
    host.assert_silent().await;
    assert!(harness.engine.closed_routers().is_empty());
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_keeps_media_resources() {
    let harness = SignalingHarness::new();
    let mut publisher = harness.peer();
    let mut viewer = harness.peer();

    let transport_id = publisher.create_transport("room-1").await;
    let producer_id = publisher
        .produce("room-1", &transport_id, MediaKind::Audio)
        .await;
    publisher.send(&fixtures::get_rtp_capabilities("room-2")).await;
    publisher.recv().await;
    let publisher_id = publisher.id();

    let mut outcome = publisher.disconnect().await;
    outcome.rooms_left.sort();
    assert_eq!(
        outcome.rooms_left,
        vec!["room-1".to_string(), "room-2".to_string()]
    );

    let membership = harness.dispatcher.membership();
    assert!(membership.rooms_of(publisher_id).await.is_empty());
    assert!(membership.members("room-1").await.is_empty());
    assert_eq!(membership.room_count().await, 0);

    // The producer outlives its publisher's connection
    assert!(harness.registry().get("room-1").await.unwrap().is_some());
    assert!(harness.engine.closed_routers().is_empty());
    assert_eq!(harness.engine.producer_count(), 1);

    let recv_transport = viewer.create_transport("room-1").await;
    viewer
        .send(&fixtures::consume("room-1", &recv_transport))
        .await;
    match viewer.recv().await {
        ServerMessage::ConsumerCreated { producer_id: id, .. } => assert_eq!(id, producer_id),
        other => panic!("expected consumer-created, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_leaves_other_members() {
    let harness = SignalingHarness::new();
    let a = harness.peer();
    let b = harness.peer();

    a.send(&json!({ "type": "hello", "roomId": "room-1" }).to_string())
        .await;
    b.send(&json!({ "type": "hello", "roomId": "room-1" }).to_string())
        .await;
    let b_id = b.id();

    let outcome = a.disconnect().await;
    assert!(outcome.rooms_emptied.is_empty());
    assert_eq!(
        harness.dispatcher.membership().members("room-1").await,
        vec![b_id]
    );
}

// ============================================================================
// Full session
// ============================================================================

#[tokio::test]
async fn test_publish_then_subscribe() {
    let harness = SignalingHarness::new();
    let mut alice = harness.peer();
    let mut bob = harness.peer();

    // Alice publishes
    alice.send(&fixtures::get_rtp_capabilities("demo")).await;
    let caps = alice.recv_json().await;
    assert_eq!(caps["type"], "rtp-capabilities");
    assert!(caps["rtpCapabilities"]["codecs"].is_array());

    alice.send(&fixtures::create_transport("demo")).await;
    let created = alice.recv_json().await;
    assert_eq!(created["type"], "transport-created");
    let alice_transport = created["params"]["id"].as_str().unwrap().to_string();
    for field in ["iceParameters", "iceCandidates", "dtlsParameters"] {
        assert!(created["params"].get(field).is_some(), "missing {field}");
    }

    alice
        .send(&fixtures::connect_transport("demo", &alice_transport))
        .await;
    alice.assert_silent().await;

    alice
        .send(&fixtures::produce("demo", &alice_transport, MediaKind::Audio))
        .await;
    let produced = alice.recv_json().await;
    assert_eq!(produced["type"], "produced");
    let producer_id = produced["id"].as_str().unwrap().to_string();

    // Bob subscribes
    bob.send(&fixtures::get_rtp_capabilities("demo")).await;
    bob.recv().await;
    let bob_transport = bob.create_transport("demo").await;
    bob.send(&fixtures::connect_transport("demo", &bob_transport))
        .await;
    bob.send(&fixtures::consume("demo", &bob_transport)).await;

    let consumer = bob.recv_json().await;
    assert_eq!(consumer["type"], "consumer-created");
    assert_eq!(consumer["producerId"], producer_id.as_str());
    assert_eq!(consumer["kind"], "audio");
    assert!(consumer["id"].is_string());
    assert!(consumer.get("rtpParameters").is_some());
    bob.assert_silent().await;
    alice.assert_silent().await;

    assert_eq!(harness.engine.routers_created(), 1);
    assert_eq!(harness.engine.call_count("connect_transport"), 2);
}

// ============================================================================
// Engine failures
// ============================================================================

#[tokio::test]
async fn test_failed_transport_registers_nothing() {
    let engine = MockMediaEngine::builder().reject_transports().build();
    let harness = SignalingHarness::with_engine(engine);
    let mut peer = harness.peer();

    peer.send(&fixtures::create_transport("room-1")).await;
    peer.assert_silent().await;

    let room = harness.registry().get("room-1").await.unwrap().unwrap();
    assert!(room.get_state().await.unwrap().transport_ids.is_empty());
}

#[tokio::test]
async fn test_failed_produce_registers_nothing() {
    let engine = MockMediaEngine::builder().reject_produce().build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));
    let mut peer = harness.peer();
    let transport_id = peer.create_transport("room-1").await;

    peer.send(&fixtures::produce("room-1", &transport_id, MediaKind::Video))
        .await;
    peer.assert_silent().await;

    let room = harness.registry().get("room-1").await.unwrap().unwrap();
    assert!(room.get_state().await.unwrap().producer_ids.is_empty());
    assert_eq!(engine.call_count("produce"), 1);
}

#[tokio::test]
async fn test_failed_consume_continues_with_nothing_registered() {
    let engine = MockMediaEngine::builder().reject_consume().build();
    let harness = SignalingHarness::with_engine(Arc::clone(&engine));
    let mut publisher = harness.peer();
    let mut viewer = harness.peer();

    let send_transport = publisher.create_transport("room-1").await;
    publisher
        .produce("room-1", &send_transport, MediaKind::Audio)
        .await;
    publisher
        .produce("room-1", &send_transport, MediaKind::Video)
        .await;

    let recv_transport = viewer.create_transport("room-1").await;
    viewer
        .send(&fixtures::consume("room-1", &recv_transport))
        .await;
    viewer.assert_silent().await;

    // Both producers were attempted
    assert_eq!(engine.call_count("consume"), 2);
    let room = harness.registry().get("room-1").await.unwrap().unwrap();
    assert!(room.get_state().await.unwrap().consumer_ids.is_empty());
}

#[tokio::test]
async fn test_failed_connect_has_no_reply() {
    let engine = MockMediaEngine::builder().reject_connect().build();
    let harness = SignalingHarness::with_engine(engine);
    let mut peer = harness.peer();
    let transport_id = peer.create_transport("room-1").await;

    peer.send(&fixtures::connect_transport("room-1", &transport_id))
        .await;
    peer.assert_silent().await;

    // The transport is still usable for other requests
    peer.send(&fixtures::produce("room-1", &transport_id, MediaKind::Audio))
        .await;
    assert!(matches!(peer.recv().await, ServerMessage::Produced { .. }));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_replies_follow_message_order() {
    let harness = SignalingHarness::new();
    let mut peer = harness.peer();

    peer.send(&fixtures::get_rtp_capabilities("room-1")).await;
    peer.send(&fixtures::create_transport("room-1")).await;
    peer.send(&fixtures::produce("room-1", "t1", MediaKind::Audio))
        .await;
    peer.send(&fixtures::produce("room-1", "t9", MediaKind::Audio))
        .await;

    let types: Vec<&str> = peer
        .drain()
        .iter()
        .map(ServerMessage::message_type)
        .collect();
    assert_eq!(
        types,
        vec!["rtp-capabilities", "transport-created", "produced", "error"]
    );
}
