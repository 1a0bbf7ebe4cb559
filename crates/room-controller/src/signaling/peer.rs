//! Peer - one participant, multiplexed over several signaling channels.
//!
//! A `Peer` owns a priority-ordered set of [`Connection`]s to the same
//! logical client. Inbound traffic from every channel funnels through one
//! shared [`Pipeline`]; outbound traffic walks the channels in ascending
//! priority order and the first successful send wins. There are no retries:
//! failover only walks connections that already exist.
//!
//! # Lifecycle
//!
//! 1. Created on the first signaling attach for a client
//! 2. Survives reconnects: a resumption token minted at creation lets a new
//!    channel re-attach to the same peer identity
//! 3. Closing the last connection closes the peer, cascading closes to all
//!    owned media resources and deregistering it from its router and room

use crate::authorization::{Role, RoleChange, BASELINE_ROLE};
use crate::errors::GENERIC_SERVER_ERROR;
use crate::media::resources::{Consumer, Producer, WebRtcTransport};
use crate::media::Router;
use crate::observability::metrics as rc_metrics;
use crate::signaling::connection::{Connection, ConnectionEvent, RequestReply};
use crate::signaling::room::Room;
use crate::signaling::{Message, Pipeline};
use common::types::{ConnectionId, ConsumerId, PeerId, ProducerId, RoomId, TransportId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Buffer size for the role-change broadcast channel.
const ROLE_EVENT_CHANNEL_BUFFER: usize = 16;

/// The mutable per-message dispatch context shared by a peer's middlewares.
pub struct PeerContext {
    /// The peer the message arrived from.
    pub peer: Arc<Peer>,
    /// The inbound message.
    pub message: Message,
    /// Response payload, filled in by whichever middleware handles a request.
    pub response: serde_json::Map<String, Value>,
    /// Whether some middleware recognized the method. Monotonic: once true,
    /// never reset.
    pub handled: bool,
}

/// Snapshot of a peer for room rosters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: PeerId,
    pub display_name: String,
    pub roles: Vec<Role>,
}

/// One participant, multiplexed over its signaling channels.
pub struct Peer {
    id: PeerId,
    room_id: RoomId,
    display_name: String,
    /// Session-resumption token, pushed to every newly attached connection.
    token: String,
    pipeline: Pipeline<PeerContext>,
    /// Sorted ascending by priority; re-sorted on every attach.
    connections: Mutex<Vec<Arc<dyn Connection>>>,
    /// Always contains the baseline role.
    roles: Mutex<Vec<Role>>,
    role_events: broadcast::Sender<RoleChange>,
    router: Mutex<Option<Arc<Router>>>,
    room: Mutex<Weak<Room>>,
    transports: Mutex<HashMap<TransportId, Arc<WebRtcTransport>>>,
    producers: Mutex<HashMap<ProducerId, Arc<Producer>>>,
    consumers: Mutex<HashMap<ConsumerId, Arc<Consumer>>>,
    closed: AtomicBool,
    close_token: CancellationToken,
    /// Bounded wait per outbound attempt; elapsed is a transport failure.
    request_timeout: Duration,
}

impl Peer {
    /// Create a peer. The resumption `token` must already be minted for
    /// `id`; connections attach separately via [`Peer::add_connection`].
    #[must_use]
    pub fn new(
        id: PeerId,
        room_id: RoomId,
        display_name: String,
        token: String,
        request_timeout: Duration,
    ) -> Arc<Self> {
        debug!(target: "rc.signaling.peer", peer_id = %id, room_id = %room_id, "Peer created");

        let (role_events, _) = broadcast::channel(ROLE_EVENT_CHANNEL_BUFFER);

        Arc::new(Self {
            id,
            room_id,
            display_name,
            token,
            pipeline: Pipeline::new(),
            connections: Mutex::new(Vec::new()),
            roles: Mutex::new(vec![BASELINE_ROLE]),
            role_events,
            router: Mutex::new(None),
            room: Mutex::new(Weak::new()),
            transports: Mutex::new(HashMap::new()),
            producers: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            request_timeout,
        })
    }

    /// Stable peer id; survives reconnects.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The room this peer belongs to.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The shared middleware pipeline all of this peer's channels feed.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<PeerContext> {
        &self.pipeline
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when the peer closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Snapshot of currently held roles.
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        self.roles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to role grants and revocations.
    #[must_use]
    pub fn subscribe_role_changes(&self) -> broadcast::Receiver<RoleChange> {
        self.role_events.subscribe()
    }

    /// Roster entry for this peer.
    #[must_use]
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            display_name: self.display_name.clone(),
            roles: self.roles(),
        }
    }

    /// Grant a role. Idempotent; the baseline role can never be granted
    /// again. A successful grant emits [`RoleChange::Got`].
    pub fn add_role(&self, role: Role) {
        if self.is_closed() || role == BASELINE_ROLE {
            return;
        }

        let granted = {
            let mut roles = self.roles.lock().unwrap_or_else(PoisonError::into_inner);
            if roles.contains(&role) {
                false
            } else {
                roles.push(role);
                true
            }
        };

        if granted {
            debug!(target: "rc.signaling.peer", peer_id = %self.id, ?role, "Role granted");
            let _ = self.role_events.send(RoleChange::Got(role));
        }
    }

    /// Revoke a role. Idempotent; the baseline role can never be revoked.
    /// A successful revocation emits [`RoleChange::Lost`].
    pub fn remove_role(&self, role: Role) {
        if self.is_closed() || role == BASELINE_ROLE {
            return;
        }

        let revoked = {
            let mut roles = self.roles.lock().unwrap_or_else(PoisonError::into_inner);
            let before = roles.len();
            roles.retain(|held| *held != role);
            roles.len() != before
        };

        if revoked {
            debug!(target: "rc.signaling.peer", peer_id = %self.id, ?role, "Role revoked");
            let _ = self.role_events.send(RoleChange::Lost(role));
        }
    }

    /// Attach a connection and start pumping its inbound events through the
    /// shared pipeline. Immediately pushes the resumption token to the new
    /// channel so a future reconnect can resume this peer identity.
    pub async fn add_connection(
        self: &Arc<Self>,
        connection: Arc<dyn Connection>,
        events: mpsc::Receiver<ConnectionEvent>,
    ) {
        // Checked under the connections lock: a concurrent close drains the
        // list under the same lock, so the connection is either drained with
        // the rest or refused here.
        let attached = {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.is_closed() {
                false
            } else {
                connections.push(Arc::clone(&connection));
                // Stable sort: earlier-attached channels keep winning ties.
                connections.sort_by_key(|c| c.priority());
                true
            }
        };
        if !attached {
            connection.close();
            return;
        }

        debug!(
            target: "rc.signaling.peer",
            peer_id = %self.id,
            connection_id = %connection.id(),
            priority = connection.priority(),
            "Connection attached"
        );

        let peer = Arc::clone(self);
        let pump_connection = Arc::clone(&connection);
        tokio::spawn(async move {
            peer.pump_events(pump_connection, events).await;
        });

        let token_notice = Message::new("token", json!({ "token": self.token }));
        if let Err(e) = connection.notify(token_notice).await {
            warn!(
                target: "rc.signaling.peer",
                peer_id = %self.id,
                connection_id = %connection.id(),
                error = %e,
                "Failed to push resumption token"
            );
        }
    }

    /// Drive one connection's inbound events until it closes or the peer
    /// does.
    async fn pump_events(
        self: Arc<Self>,
        connection: Arc<dyn Connection>,
        mut events: mpsc::Receiver<ConnectionEvent>,
    ) {
        loop {
            tokio::select! {
                () = self.close_token.cancelled() => break,

                event = events.recv() => match event {
                    Some(ConnectionEvent::Notification(message)) => {
                        self.dispatch_notification(message).await;
                    }
                    Some(ConnectionEvent::Request { message, reply }) => {
                        self.dispatch_request(message, reply).await;
                    }
                    Some(ConnectionEvent::Closed) | None => {
                        self.handle_connection_closed(connection.id()).await;
                        break;
                    }
                },
            }
        }
    }

    /// Run one inbound notification through the pipeline. Unhandled
    /// notifications are logged and dropped; there is nothing to reject.
    async fn dispatch_notification(self: &Arc<Self>, message: Message) {
        rc_metrics::record_message_dispatched("notification");
        let method = message.method.clone();

        let mut ctx = PeerContext {
            peer: Arc::clone(self),
            message,
            response: serde_json::Map::new(),
            handled: false,
        };

        match self.pipeline.execute(&mut ctx).await {
            Ok(()) if ctx.handled => {}
            Ok(()) => {
                rc_metrics::record_message_unhandled("notification");
                error!(
                    target: "rc.signaling.peer",
                    peer_id = %self.id,
                    method = %method,
                    "No middleware handled the notification"
                );
            }
            Err(e) => {
                error!(
                    target: "rc.signaling.peer",
                    peer_id = %self.id,
                    method = %method,
                    error = %e,
                    "Notification dispatch failed"
                );
            }
        }
    }

    /// Run one inbound request through the pipeline and translate the
    /// outcome: handled responds with the accumulated response, anything
    /// else rejects with the generic server error.
    async fn dispatch_request(self: &Arc<Self>, message: Message, reply: RequestReply) {
        rc_metrics::record_message_dispatched("request");
        let method = message.method.clone();

        let mut ctx = PeerContext {
            peer: Arc::clone(self),
            message,
            response: serde_json::Map::new(),
            handled: false,
        };

        match self.pipeline.execute(&mut ctx).await {
            Ok(()) if ctx.handled => {
                reply.respond(Value::Object(ctx.response));
            }
            Ok(()) => {
                rc_metrics::record_message_unhandled("request");
                debug!(
                    target: "rc.signaling.peer",
                    peer_id = %self.id,
                    method = %method,
                    "Unhandled request"
                );
                reply.reject(GENERIC_SERVER_ERROR);
            }
            Err(e) => {
                error!(
                    target: "rc.signaling.peer",
                    peer_id = %self.id,
                    method = %method,
                    error = %e,
                    "Request dispatch failed"
                );
                reply.reject(e.client_message());
            }
        }
    }

    /// Detach a closed connection; closing the last one closes the peer.
    async fn handle_connection_closed(&self, connection_id: ConnectionId) {
        let remaining = {
            let mut connections = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            connections.retain(|c| c.id() != connection_id);
            connections.len()
        };

        debug!(
            target: "rc.signaling.peer",
            peer_id = %self.id,
            connection_id = %connection_id,
            remaining,
            "Connection closed"
        );

        if remaining == 0 {
            self.close().await;
        }
    }

    /// Send a notification via the first connection, in priority order, that
    /// accepts it. Total failure resolves without result and is logged;
    /// there is no retry.
    pub async fn notify(&self, message: Message) {
        if self.is_closed() {
            return;
        }

        for connection in self.connections_snapshot() {
            match timeout(self.request_timeout, connection.notify(message.clone())).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => {
                    error!(
                        target: "rc.signaling.peer",
                        peer_id = %self.id,
                        connection_id = %connection.id(),
                        method = %message.method,
                        error = %e,
                        "Notify failed, trying next connection"
                    );
                }
                Err(_) => {
                    error!(
                        target: "rc.signaling.peer",
                        peer_id = %self.id,
                        connection_id = %connection.id(),
                        method = %message.method,
                        "Notify timed out, trying next connection"
                    );
                }
            }
            rc_metrics::record_connection_failover();
        }

        warn!(
            target: "rc.signaling.peer",
            peer_id = %self.id,
            method = %message.method,
            "No connection available for notify"
        );
    }

    /// Send a request via the first connection, in priority order, that
    /// yields a reply. Total failure resolves to `None` and is logged;
    /// there is no retry.
    pub async fn request(&self, message: Message) -> Option<Value> {
        if self.is_closed() {
            return None;
        }

        for connection in self.connections_snapshot() {
            match timeout(self.request_timeout, connection.request(message.clone())).await {
                Ok(Ok(response)) => return Some(response),
                Ok(Err(e)) => {
                    error!(
                        target: "rc.signaling.peer",
                        peer_id = %self.id,
                        connection_id = %connection.id(),
                        method = %message.method,
                        error = %e,
                        "Request failed, trying next connection"
                    );
                }
                Err(_) => {
                    error!(
                        target: "rc.signaling.peer",
                        peer_id = %self.id,
                        connection_id = %connection.id(),
                        method = %message.method,
                        "Request timed out, trying next connection"
                    );
                }
            }
            rc_metrics::record_connection_failover();
        }

        warn!(
            target: "rc.signaling.peer",
            peer_id = %self.id,
            method = %message.method,
            "No connection available for request"
        );
        None
    }

    fn connections_snapshot(&self) -> Vec<Arc<dyn Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of currently attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bind this peer to the router carrying its media on some node.
    pub fn set_router(self: &Arc<Self>, router: Arc<Router>) {
        router.register_peer(self);
        *self.router.lock().unwrap_or_else(PoisonError::into_inner) = Some(router);
    }

    /// The router currently carrying this peer's media, if any.
    #[must_use]
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Back-reference set by [`Room::add_peer`].
    pub(crate) fn set_room(&self, room: Weak<Room>) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = room;
    }

    /// Track a media transport owned by this peer.
    pub fn add_transport(&self, transport: Arc<WebRtcTransport>) {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transport.id(), transport);
    }

    /// Track a producer owned by this peer.
    pub fn add_producer(&self, producer: Arc<Producer>) {
        self.producers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(producer.id(), producer);
    }

    /// Track a consumer owned by this peer.
    pub fn add_consumer(&self, consumer: Arc<Consumer>) {
        self.consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(consumer.id(), consumer);
    }

    /// Owned resource counts: (transports, producers, consumers).
    #[must_use]
    pub fn resource_counts(&self) -> (usize, usize, usize) {
        (
            self.transports
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            self.producers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            self.consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        )
    }

    /// Close the peer: close every connection, cascade closes to all owned
    /// media resources, and deregister from router and room. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(target: "rc.signaling.peer", peer_id = %self.id, "Peer closing");

        let connections: Vec<_> = {
            let mut guard = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain(..).collect()
        };
        for connection in connections {
            connection.close();
        }

        let producers: Vec<_> = {
            let mut guard = self
                .producers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, p)| p).collect()
        };
        for producer in producers {
            producer.close(false).await;
        }

        let consumers: Vec<_> = {
            let mut guard = self
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, c)| c).collect()
        };
        for consumer in consumers {
            consumer.close(false).await;
        }

        let transports: Vec<_> = {
            let mut guard = self
                .transports
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, t)| t).collect()
        };
        for transport in transports {
            transport.close(false).await;
        }

        let router = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(router) = router {
            router.deregister_peer(self.id).await;
        }

        let room = self
            .room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade();
        if let Some(room) = room {
            room.remove_peer(self.id).await;
        }

        self.close_token.cancel();
        debug!(target: "rc.signaling.peer", peer_id = %self.id, "Peer closed");
    }
}
