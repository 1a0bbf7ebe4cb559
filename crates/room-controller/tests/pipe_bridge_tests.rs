//! Router bridge integration tests.
//!
//! Exercises the two-phase pipe-transport handshake between routers on two
//! mock media nodes, bridge idempotence under concurrency, the loop-free
//! close protocol, and relayed data-consumer lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use common::types::{DataProducerId, PeerId, RoomId};
use rc_test_utils::MockMediaNode;
use room_controller::errors::RcError;
use room_controller::media::{CloseReason, MediaNodeConnection, Router};
use room_controller::signaling::{Message, Peer};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

fn make_node() -> (MockMediaNode, Arc<MediaNodeConnection>) {
    let node = MockMediaNode::new();
    node.install_default_handlers();
    let connection = node.connect(REQUEST_TIMEOUT);
    (node, connection)
}

/// Let spawned pump and watcher tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_handshake_creates_linked_pair() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();

    let (local, remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    assert_eq!(local.router_id(), router_a.id());
    assert_eq!(local.remote_router_id(), router_b.id());
    assert_eq!(remote.router_id(), router_b.id());
    assert_eq!(remote.remote_router_id(), router_a.id());

    // Each side knows the other.
    assert_eq!(local.pair().unwrap().id(), remote.id());
    assert_eq!(remote.pair().unwrap().id(), local.id());

    assert_eq!(router_a.pipe_transport_count().await, 1);
    assert_eq!(router_b.pipe_transport_count().await, 1);

    // Each node saw exactly one create and one crossed connect.
    for node in [&node_a, &node_b] {
        let methods: Vec<_> = node.requests().iter().map(|r| r.method.clone()).collect();
        assert_eq!(
            methods,
            vec!["getRouter", "createPipeTransport", "connectPipeTransport"]
        );
    }
}

#[tokio::test]
async fn test_concurrent_bridging_builds_exactly_one_bridge() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();

    let (from_a, from_b) = tokio::join!(
        router_a.pipe_to_router(&router_b),
        router_b.pipe_to_router(&router_a),
    );
    let (a_local, a_remote) = from_a.unwrap();
    let (b_local, b_remote) = from_b.unwrap();

    // Both callers got the same bridge, seen from their own side.
    assert_eq!(a_local.id(), b_remote.id());
    assert_eq!(a_remote.id(), b_local.id());

    assert_eq!(router_a.pipe_transport_count().await, 1);
    assert_eq!(router_b.pipe_transport_count().await, 1);

    // The second call reused the bridge instead of re-running the handshake.
    for node in [&node_a, &node_b] {
        let creates = node
            .requests()
            .iter()
            .filter(|r| r.method == "createPipeTransport")
            .count();
        assert_eq!(creates, 1);
    }
}

#[tokio::test]
async fn test_repeated_bridging_is_idempotent() {
    let room_id = RoomId::new();
    let (_node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();

    let (first, _) = router_a.pipe_to_router(&router_b).await.unwrap();
    let (second, _) = router_a.pipe_to_router(&router_b).await.unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(router_a.pipe_transport_count().await, 1);
}

#[tokio::test]
async fn test_local_close_tears_down_both_sides_without_looping() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    local.close(CloseReason::Local).await;

    assert!(local.is_closed());
    assert!(remote.is_closed());
    assert_eq!(router_a.pipe_transport_count().await, 0);
    assert_eq!(router_b.pipe_transport_count().await, 0);

    // Exactly one close instruction per node, no echo back and forth.
    assert_eq!(node_a.notification_count("closePipeTransport"), 1);
    assert_eq!(node_b.notification_count("closePipeTransport"), 1);
}

#[tokio::test]
async fn test_node_reported_close_cascades_without_echo() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    node_a
        .notify_controller(Message::new(
            "pipeTransportClosed",
            json!({
                "routerId": router_a.id(),
                "pipeTransportId": local.id(),
            }),
        ))
        .await;
    settle().await;

    assert!(local.is_closed());
    assert!(remote.is_closed());

    // Node A already dropped its side; only node B is told.
    assert_eq!(node_a.notification_count("closePipeTransport"), 0);
    assert_eq!(node_b.notification_count("closePipeTransport"), 1);
}

#[tokio::test]
async fn test_stale_close_notice_is_a_no_op() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    let notice = Message::new(
        "pipeTransportClosed",
        json!({
            "routerId": router_a.id(),
            "pipeTransportId": local.id(),
        }),
    );
    node_a.notify_controller(notice.clone()).await;
    node_a.notify_controller(notice).await;
    settle().await;

    assert!(local.is_closed());
    assert_eq!(node_b.notification_count("closePipeTransport"), 1);
}

#[tokio::test]
async fn test_node_rejection_surfaces_as_media_node_error() {
    let (node, conn) = make_node();
    node.fail_method("getRouter");

    let err = Router::create(RoomId::new(), conn).await.unwrap_err();

    assert!(matches!(err, RcError::MediaNode(_)));
}

#[tokio::test]
async fn test_failed_handshake_rolls_back_partial_state() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();

    // The handshake runs in ascending router-id order; fail the side whose
    // transport is created second so the first one needs rolling back.
    let (first_node, second_node) = if router_a.id() < router_b.id() {
        (&node_a, &node_b)
    } else {
        (&node_b, &node_a)
    };
    second_node.fail_method("createPipeTransport");

    let result = router_a.pipe_to_router(&router_b).await;
    assert!(result.is_err());

    assert_eq!(router_a.pipe_transport_count().await, 0);
    assert_eq!(router_b.pipe_transport_count().await, 0);
    assert_eq!(first_node.notification_count("closePipeTransport"), 1);
    assert_eq!(second_node.notification_count("closePipeTransport"), 0);
}

#[tokio::test]
async fn test_last_bridge_dropped_after_last_peer_closes_router() {
    let room_id = RoomId::new();
    let (_node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();

    let peer = Peer::new(
        PeerId::new(),
        room_id,
        "alice".to_string(),
        "resumption-token".to_string(),
        REQUEST_TIMEOUT,
    );
    router_a.register_peer(&peer);

    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    // A live bridge keeps the router open past the last peer.
    router_a.deregister_peer(peer.id()).await;
    assert!(!router_a.is_closed());

    local.close(CloseReason::Local).await;

    assert!(router_a.is_closed());
    assert!(router_b.is_closed());
}

#[tokio::test]
async fn test_data_consumer_lifecycle() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    let consumer = local.consume_data(DataProducerId::new()).await.unwrap();
    assert_eq!(local.data_consumer_count(), 1);
    assert_eq!(consumer.label(), Some("chat"));
    assert_eq!(consumer.sctp_stream_parameters().unwrap().stream_id, 1);

    // Local close instructs the node exactly once, even when repeated.
    consumer.close(false).await;
    consumer.close(false).await;
    assert_eq!(node_a.notification_count("closeDataConsumer"), 1);
}

#[tokio::test]
async fn test_remote_data_consumer_close_sends_nothing() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    let consumer = local.consume_data(DataProducerId::new()).await.unwrap();
    consumer.close(true).await;

    assert_eq!(node_a.notification_count("closeDataConsumer"), 0);
}

#[tokio::test]
async fn test_last_data_consumer_closing_tears_down_bridge() {
    let room_id = RoomId::new();
    let (_node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    let consumer = local.consume_data(DataProducerId::new()).await.unwrap();
    consumer.close(false).await;
    settle().await;

    assert!(local.is_closed());
    assert!(remote.is_closed());
    assert_eq!(router_a.pipe_transport_count().await, 0);
    assert_eq!(router_b.pipe_transport_count().await, 0);
}

#[tokio::test]
async fn test_consume_data_racing_close_never_leaks_a_consumer() {
    let room_id = RoomId::new();
    let (_node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    // Whichever way the race resolves, no consumer handle may survive the
    // transport: it is either cascaded by the close or refused outright.
    let (result, ()) = tokio::join!(
        local.consume_data(DataProducerId::new()),
        local.close(CloseReason::Local),
    );
    settle().await;

    if let Ok(consumer) = result {
        assert!(consumer.is_closed());
    }
    assert!(local.is_closed());
    assert_eq!(local.data_consumer_count(), 0);
}

#[tokio::test]
async fn test_node_channel_death_closes_data_consumers() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (_node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, _remote) = router_a.pipe_to_router(&router_b).await.unwrap();
    let consumer = local.consume_data(DataProducerId::new()).await.unwrap();

    node_a.drop_channel().await;
    settle().await;

    assert!(consumer.is_closed());
    // The node is gone; nothing is sent after it.
    assert_eq!(node_a.notification_count("closeDataConsumer"), 0);
}

#[tokio::test]
async fn test_node_channel_death_closes_dependents() {
    let room_id = RoomId::new();
    let (node_a, conn_a) = make_node();
    let (node_b, conn_b) = make_node();
    let router_a = Router::create(room_id, conn_a).await.unwrap();
    let router_b = Router::create(room_id, conn_b).await.unwrap();
    let (local, remote) = router_a.pipe_to_router(&router_b).await.unwrap();

    node_a.drop_channel().await;
    settle().await;

    assert!(router_a.is_closed());
    assert!(local.is_closed());
    assert!(remote.is_closed());
    // The dead node is never notified; the surviving one is told once.
    assert_eq!(node_a.notification_count("closePipeTransport"), 0);
    assert_eq!(node_b.notification_count("closePipeTransport"), 1);
}
