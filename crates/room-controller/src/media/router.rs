//! Router - a per-room media switch on one node.
//!
//! Each room gets at most one router per media node. Routers on different
//! nodes are bridged on demand with a pair of pipe transports so producers
//! on one node reach consumers on another. The bridge handshake is the one
//! place two routers' state is mutated together, so both routers' transport
//! maps stay locked for its whole duration.

use crate::errors::RcError;
use crate::media::node_connection::{MediaNodeConnection, NodeContext};
use crate::media::pipe_transport::{
    CloseReason, PipeTransport, PipeTransportConnectParams,
};
use crate::media::DataConsumer;
use crate::middleware::node::RouterMessagesMiddleware;
use crate::observability::metrics as rc_metrics;
use crate::signaling::{Message, Middleware, Peer};
use common::types::{DataConsumerId, PeerId, PipeTransportId, RoomId, RouterId};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Deserialize)]
struct RouterCreated {
    id: RouterId,
}

/// A media switch for one room on one node.
pub struct Router {
    id: RouterId,
    room_id: RoomId,
    node: Arc<MediaNodeConnection>,
    /// Registered on the node pipeline for this router's lifetime.
    node_middleware: Arc<dyn Middleware<NodeContext>>,
    /// Peers whose media this router carries.
    peers: Mutex<HashMap<PeerId, Weak<Peer>>>,
    /// One bridge per remote router, keyed by the far side's id. An async
    /// lock: the bridge handshake holds it across node round trips.
    pipe_transports: tokio::sync::Mutex<HashMap<RouterId, Arc<PipeTransport>>>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.id)
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Obtain the room's router on `node`, creating it on the node if
    /// needed, and wire its middleware into the node pipeline.
    ///
    /// # Errors
    ///
    /// Fails if the node request fails or returns a malformed reply.
    pub async fn create(
        room_id: RoomId,
        node: Arc<MediaNodeConnection>,
    ) -> Result<Arc<Self>, RcError> {
        let reply = node
            .request(Message::new("getRouter", json!({ "roomId": room_id })))
            .await?;
        let created: RouterCreated = serde_json::from_value(reply)?;

        let router = Arc::new_cyclic(|weak: &Weak<Router>| {
            let node_middleware: Arc<dyn Middleware<NodeContext>> =
                Arc::new(RouterMessagesMiddleware::new(Weak::clone(weak)));

            Self {
                id: created.id,
                room_id,
                node: Arc::clone(&node),
                node_middleware,
                peers: Mutex::new(HashMap::new()),
                pipe_transports: tokio::sync::Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                close_token: CancellationToken::new(),
            }
        });

        node.pipeline()
            .use_middleware(Arc::clone(&router.node_middleware));

        info!(
            target: "rc.media.router",
            router_id = %router.id,
            room_id = %room_id,
            "Router ready"
        );

        let weak = Arc::downgrade(&router);
        let node_closed = node.closed_token();
        let router_closed = router.close_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = node_closed.cancelled() => {
                    if let Some(router) = weak.upgrade() {
                        router.close().await;
                    }
                }
                () = router_closed.cancelled() => {}
            }
        });

        Ok(router)
    }

    #[must_use]
    pub fn id(&self) -> RouterId {
        self.id
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// The node this router lives on.
    #[must_use]
    pub fn node(&self) -> &Arc<MediaNodeConnection> {
        &self.node
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when the router closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Track a peer whose media this router carries.
    pub fn register_peer(&self, peer: &Arc<Peer>) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer.id(), Arc::downgrade(peer));
    }

    /// Drop a departed peer. The router closes itself once it carries no
    /// peers and no bridges.
    pub async fn deregister_peer(&self, peer_id: PeerId) {
        let peers_empty = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.remove(&peer_id);
            peers.is_empty()
        };

        if peers_empty && self.pipe_transports.lock().await.is_empty() {
            self.close().await;
        }
    }

    /// Number of peers currently on this router.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bridge this router to `remote` with a pair of pipe transports,
    /// returning `(local, remote)` sides. Idempotent: a live bridge between
    /// the two routers is returned as is, and concurrent calls for the same
    /// pair produce exactly one bridge.
    ///
    /// Both routers' transport maps stay locked for the whole handshake, in
    /// ascending router-id order so two crossing calls cannot deadlock.
    ///
    /// # Errors
    ///
    /// Fails if either router is closed or any handshake step fails; partial
    /// node-side state is rolled back before returning.
    pub async fn pipe_to_router(
        self: &Arc<Self>,
        remote: &Arc<Router>,
    ) -> Result<(Arc<PipeTransport>, Arc<PipeTransport>), RcError> {
        if self.id == remote.id {
            return Err(RcError::Internal(
                "cannot bridge a router to itself".to_string(),
            ));
        }
        if self.is_closed() || remote.is_closed() {
            return Err(RcError::Closed("router"));
        }

        // Canonical lock order by router id.
        let (first, second) = if self.id < remote.id {
            (self, remote)
        } else {
            (remote, self)
        };
        let mut first_map = first.pipe_transports.lock().await;
        let mut second_map = second.pipe_transports.lock().await;

        if let Some(local_side) = first_map.get(&second.id) {
            if !local_side.is_closed() {
                if let Some(remote_side) = second_map.get(&first.id) {
                    debug!(
                        target: "rc.media.router",
                        router_id = %self.id,
                        remote_router_id = %remote.id,
                        "Reusing existing bridge"
                    );
                    let (local_side, remote_side) =
                        (Arc::clone(local_side), Arc::clone(remote_side));
                    return if Arc::ptr_eq(first, self) {
                        Ok((local_side, remote_side))
                    } else {
                        Ok((remote_side, local_side))
                    };
                }
            }
        }

        let first_params = first.create_pipe_transport_on_node().await?;

        let second_params = match second.create_pipe_transport_on_node().await {
            Ok(params) => params,
            Err(e) => {
                first.rollback_pipe_transport(first_params.id).await;
                return Err(e);
            }
        };

        // Crossed connect: each side targets the other's endpoint.
        if let Err(e) = first.connect_pipe_transport_on_node(&first_params.id, &second_params).await
        {
            first.rollback_pipe_transport(first_params.id).await;
            second.rollback_pipe_transport(second_params.id).await;
            return Err(e);
        }
        if let Err(e) = second.connect_pipe_transport_on_node(&second_params.id, &first_params).await
        {
            first.rollback_pipe_transport(first_params.id).await;
            second.rollback_pipe_transport(second_params.id).await;
            return Err(e);
        }

        let first_side =
            PipeTransport::new(first_params.id, first, second.id, Arc::clone(&first.node));
        let second_side =
            PipeTransport::new(second_params.id, second, first.id, Arc::clone(&second.node));
        first_side.set_pair(&second_side);
        second_side.set_pair(&first_side);

        first_map.insert(second.id, Arc::clone(&first_side));
        second_map.insert(first.id, Arc::clone(&second_side));
        rc_metrics::record_pipe_transport_opened();
        rc_metrics::record_pipe_transport_opened();

        info!(
            target: "rc.media.router",
            router_id = %self.id,
            remote_router_id = %remote.id,
            "Bridge established"
        );

        if Arc::ptr_eq(first, self) {
            Ok((first_side, second_side))
        } else {
            Ok((second_side, first_side))
        }
    }

    async fn create_pipe_transport_on_node(
        &self,
    ) -> Result<PipeTransportConnectParams, RcError> {
        let reply = self
            .node
            .request(Message::new(
                "createPipeTransport",
                json!({ "routerId": self.id }),
            ))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    async fn connect_pipe_transport_on_node(
        &self,
        id: &PipeTransportId,
        remote_params: &PipeTransportConnectParams,
    ) -> Result<(), RcError> {
        self.node
            .request(Message::new(
                "connectPipeTransport",
                json!({
                    "routerId": self.id,
                    "pipeTransportId": id,
                    "ip": remote_params.ip,
                    "port": remote_params.port,
                    "srtpParameters": remote_params.srtp_parameters,
                }),
            ))
            .await?;
        Ok(())
    }

    /// Best-effort teardown of a half-built handshake.
    async fn rollback_pipe_transport(&self, id: PipeTransportId) {
        let notice = Message::new(
            "closePipeTransport",
            json!({ "routerId": self.id, "pipeTransportId": id }),
        );
        if let Err(e) = self.node.notify(notice).await {
            error!(
                target: "rc.media.router",
                router_id = %self.id,
                pipe_transport_id = %id,
                error = %e,
                "Failed to roll back pipe transport"
            );
        }
    }

    /// Drop a closed transport from the bridge map. Only the transport that
    /// is actually registered is removed, so a stale close cannot evict a
    /// replacement bridge. Dropping the last bridge after the last peer has
    /// already left closes the router, mirroring `deregister_peer`.
    pub(crate) async fn forget_pipe_transport(
        &self,
        remote_router_id: RouterId,
        id: PipeTransportId,
    ) {
        let transports_empty = {
            let mut transports = self.pipe_transports.lock().await;
            if transports
                .get(&remote_router_id)
                .is_some_and(|t| t.id() == id)
            {
                transports.remove(&remote_router_id);
            }
            transports.is_empty()
        };

        let peers_empty = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();

        if transports_empty && peers_empty {
            // Boxed: reached from a transport close, and closing the router
            // closes its remaining transports.
            Box::pin(self.close()).await;
        }
    }

    /// Find a live pipe transport on this router by id.
    pub async fn find_pipe_transport(&self, id: PipeTransportId) -> Option<Arc<PipeTransport>> {
        self.pipe_transports
            .lock()
            .await
            .values()
            .find(|t| t.id() == id)
            .cloned()
    }

    /// Find a live data consumer anywhere on this router's bridges.
    pub async fn find_data_consumer(&self, id: DataConsumerId) -> Option<Arc<DataConsumer>> {
        let transports: Vec<_> = self.pipe_transports.lock().await.values().cloned().collect();
        transports.iter().find_map(|t| t.get_data_consumer(id))
    }

    /// Number of bridges this router currently has.
    pub async fn pipe_transport_count(&self) -> usize {
        self.pipe_transports.lock().await.len()
    }

    /// Close the router: tear down every bridge and detach from the node
    /// pipeline. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(target: "rc.media.router", router_id = %self.id, "Router closing");

        self.node.pipeline().remove_middleware(&self.node_middleware);

        let transports: Vec<_> = {
            let mut guard = self.pipe_transports.lock().await;
            guard.drain().map(|(_, t)| t).collect()
        };
        // A dead node already dropped its side, so skip telling it.
        let reason = if self.node.is_closed() {
            CloseReason::Remote
        } else {
            CloseReason::Local
        };
        for transport in transports {
            transport.close(reason).await;
        }

        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        self.close_token.cancel();
        debug!(target: "rc.media.router", router_id = %self.id, "Router closed");
    }
}
