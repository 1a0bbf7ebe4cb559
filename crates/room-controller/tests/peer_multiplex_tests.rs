//! Peer multiplexing integration tests.
//!
//! Exercises a peer over several mock signaling channels: priority-ordered
//! outbound delivery, failover on dead channels, request dispatch through
//! the pipeline, and the close cascade when the last channel drops.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use common::types::{ConsumerId, PeerId, ProducerId, RoomId, RouterId, TransportId};
use rc_test_utils::{MockConnection, MockMediaNode};
use room_controller::authorization::{Role, RoleChange};
use room_controller::media::resources::{Consumer, MediaKind, Producer, WebRtcTransport};
use room_controller::signaling::{Message, Peer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn make_peer() -> Arc<Peer> {
    Peer::new(
        PeerId::new(),
        RoomId::new(),
        "alice".to_string(),
        "resumption-token".to_string(),
        Duration::from_millis(200),
    )
}

/// Let spawned pump and watcher tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_attach_pushes_resumption_token() {
    let peer = make_peer();
    let (conn, events) = MockConnection::new(1);

    peer.add_connection(Arc::clone(&conn) as _, events).await;

    let sent = conn.sent_messages();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, "token");
    assert_eq!(sent[0].data, json!({ "token": "resumption-token" }));
}

#[tokio::test]
async fn test_notify_prefers_lowest_priority() {
    let peer = make_peer();
    let (low, low_events) = MockConnection::new(2);
    let (high, high_events) = MockConnection::new(1);

    // Attach in the "wrong" order; priority must decide, not attach order.
    peer.add_connection(Arc::clone(&low) as _, low_events).await;
    peer.add_connection(Arc::clone(&high) as _, high_events)
        .await;

    peer.notify(Message::new("ping", json!({}))).await;

    assert_eq!(high.sent_methods(), vec!["token", "ping"]);
    assert_eq!(low.sent_methods(), vec!["token"]);
}

#[tokio::test]
async fn test_notify_fails_over_to_next_connection() {
    let peer = make_peer();
    let (primary, primary_events) = MockConnection::new(1);
    let (backup, backup_events) = MockConnection::new(2);
    peer.add_connection(Arc::clone(&primary) as _, primary_events)
        .await;
    peer.add_connection(Arc::clone(&backup) as _, backup_events)
        .await;

    primary.set_fail_sends(true);
    peer.notify(Message::new("ping", json!({}))).await;

    assert_eq!(backup.sent_methods(), vec!["token", "ping"]);
}

#[tokio::test]
async fn test_request_times_out_and_fails_over() {
    let peer = make_peer();
    let (stalled, stalled_events) = MockConnection::new(1);
    let (backup, backup_events) = MockConnection::new(2);
    peer.add_connection(Arc::clone(&stalled) as _, stalled_events)
        .await;
    peer.add_connection(Arc::clone(&backup) as _, backup_events)
        .await;

    stalled.set_stall_sends(true);
    backup.respond_to("whoami", json!({ "name": "alice" }));

    let response = peer.request(Message::new("whoami", json!({}))).await;

    assert_eq!(response, Some(json!({ "name": "alice" })));
}

#[tokio::test]
async fn test_request_resolves_none_when_all_connections_fail() {
    let peer = make_peer();
    let (conn, events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&conn) as _, events).await;

    conn.set_fail_sends(true);
    let response = peer.request(Message::new("whoami", json!({}))).await;

    assert_eq!(response, None);
    assert!(!peer.is_closed());
}

#[tokio::test]
async fn test_unknown_request_is_rejected_with_generic_error() {
    let peer = make_peer();
    let (conn, events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&conn) as _, events).await;

    let reply = conn
        .inject_request(Message::new("noSuchMethod", json!({})))
        .await;

    let outcome = reply.await.unwrap();
    assert_eq!(outcome, Err("Server error".to_string()));
}

#[tokio::test]
async fn test_closing_last_connection_closes_peer() {
    let peer = make_peer();
    let (first, first_events) = MockConnection::new(1);
    let (second, second_events) = MockConnection::new(2);
    peer.add_connection(Arc::clone(&first) as _, first_events)
        .await;
    peer.add_connection(Arc::clone(&second) as _, second_events)
        .await;

    first.inject_closed().await;
    settle().await;
    assert!(!peer.is_closed());
    assert_eq!(peer.connection_count(), 1);

    second.inject_closed().await;
    settle().await;
    assert!(peer.is_closed());
    assert_eq!(peer.connection_count(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let peer = make_peer();
    let (conn, events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&conn) as _, events).await;

    peer.close().await;
    peer.close().await;

    assert!(peer.is_closed());
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_attach_to_closed_peer_closes_connection() {
    let peer = make_peer();
    peer.close().await;

    let (conn, events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&conn) as _, events).await;

    assert!(conn.is_closed());
    assert_eq!(peer.connection_count(), 0);
}

#[tokio::test]
async fn test_connection_attached_during_close_still_ends_up_closed() {
    let peer = make_peer();
    let (existing, existing_events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&existing) as _, existing_events)
        .await;

    // However the race resolves, the late channel must not stay open on a
    // closed peer: it is either drained with the rest or refused.
    let (late, late_events) = MockConnection::new(2);
    tokio::join!(
        peer.close(),
        peer.add_connection(Arc::clone(&late) as _, late_events),
    );

    assert!(peer.is_closed());
    assert!(late.is_closed());
    assert_eq!(peer.connection_count(), 0);
}

#[tokio::test]
async fn test_peer_close_cascades_to_owned_media_resources() {
    let peer = make_peer();
    let (conn, events) = MockConnection::new(1);
    peer.add_connection(Arc::clone(&conn) as _, events).await;

    let node = MockMediaNode::new();
    let node_conn = node.connect(Duration::from_millis(200));
    let router_id = RouterId::new();
    peer.add_transport(WebRtcTransport::new(
        TransportId::new(),
        router_id,
        Arc::clone(&node_conn),
    ));
    peer.add_producer(Producer::new(
        ProducerId::new(),
        router_id,
        MediaKind::Audio,
        Arc::clone(&node_conn),
    ));
    peer.add_consumer(Consumer::new(
        ConsumerId::new(),
        router_id,
        ProducerId::new(),
        MediaKind::Video,
        node_conn,
    ));
    assert_eq!(peer.resource_counts(), (1, 1, 1));

    peer.close().await;

    assert_eq!(peer.resource_counts(), (0, 0, 0));
    assert_eq!(node.notification_count("closeTransport"), 1);
    assert_eq!(node.notification_count("closeProducer"), 1);
    assert_eq!(node.notification_count("closeConsumer"), 1);
}

#[tokio::test]
async fn test_roles_start_at_baseline_and_broadcast_changes() {
    let peer = make_peer();
    assert_eq!(peer.roles(), vec![Role::Normal]);

    let mut changes = peer.subscribe_role_changes();

    peer.add_role(Role::Moderator);
    peer.add_role(Role::Moderator); // idempotent
    assert_eq!(peer.roles(), vec![Role::Normal, Role::Moderator]);
    assert_eq!(changes.recv().await.unwrap(), RoleChange::Got(Role::Moderator));

    peer.remove_role(Role::Moderator);
    assert_eq!(peer.roles(), vec![Role::Normal]);
    assert_eq!(
        changes.recv().await.unwrap(),
        RoleChange::Lost(Role::Moderator)
    );

    // The baseline role can never be removed.
    peer.remove_role(Role::Normal);
    assert_eq!(peer.roles(), vec![Role::Normal]);
}
