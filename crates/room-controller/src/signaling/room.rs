//! Room - the unit of peer aggregation and broadcast.
//!
//! A room owns its peers and the routers carrying the room's media across
//! nodes. Room-level behavior (chat, roster events) is expressed as
//! middlewares installed into each peer's pipeline on join and shared by all
//! peers of the room.

use crate::media::Router;
use crate::middleware::chat::ChatMiddleware;
use crate::observability::metrics as rc_metrics;
use crate::signaling::peer::PeerContext;
use crate::signaling::{Message, Middleware, Peer};
use common::types::{PeerId, RoomId, RouterId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A set of peers sharing signaling scope and media.
pub struct Room {
    id: RoomId,
    self_ref: Weak<Room>,
    /// Installed into every joining peer's pipeline, removed on leave.
    middlewares: Vec<Arc<dyn Middleware<PeerContext>>>,
    peers: Mutex<HashMap<PeerId, Arc<Peer>>>,
    routers: Mutex<HashMap<RouterId, Arc<Router>>>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl Room {
    /// Create an empty room with its room-level middlewares wired up.
    #[must_use]
    pub fn new(id: RoomId) -> Arc<Self> {
        debug!(target: "rc.signaling.room", room_id = %id, "Room created");
        rc_metrics::record_room_opened();

        Arc::new_cyclic(|weak: &Weak<Room>| {
            let middlewares: Vec<Arc<dyn Middleware<PeerContext>>> =
                vec![Arc::new(ChatMiddleware::new(Weak::clone(weak)))];

            Self {
                id,
                self_ref: Weak::clone(weak),
                middlewares,
                peers: Mutex::new(HashMap::new()),
                routers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                close_token: CancellationToken::new(),
            }
        })
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when the room closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Add a peer: install the room middlewares into its pipeline, set its
    /// room back-reference, and announce it to the existing peers.
    pub async fn add_peer(&self, peer: Arc<Peer>) {
        if self.is_closed() {
            peer.close().await;
            return;
        }

        for middleware in &self.middlewares {
            peer.pipeline().use_middleware(Arc::clone(middleware));
        }
        peer.set_room(Weak::clone(&self.self_ref));

        let peer_id = peer.id();
        let info = peer.peer_info();
        {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.insert(peer_id, peer);
        }

        debug!(target: "rc.signaling.room", room_id = %self.id, peer_id = %peer_id, "Peer joined");

        self.notify_peers("newPeer", json!(info), Some(peer_id))
            .await;
    }

    /// Remove a peer and announce its departure. The last peer leaving
    /// closes the room.
    pub async fn remove_peer(&self, peer_id: PeerId) {
        if self.is_closed() {
            return;
        }

        let (removed, remaining) = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            (peers.remove(&peer_id), peers.len())
        };

        let Some(removed) = removed else {
            return;
        };

        for middleware in &self.middlewares {
            removed.pipeline().remove_middleware(middleware);
        }

        debug!(
            target: "rc.signaling.room",
            room_id = %self.id,
            peer_id = %peer_id,
            remaining,
            "Peer left"
        );

        self.notify_peers("peerClosed", json!({ "peerId": peer_id }), None)
            .await;

        if remaining == 0 {
            self.close().await;
        }
    }

    /// Look up a live peer by id.
    #[must_use]
    pub fn get_peer(&self, peer_id: PeerId) -> Option<Arc<Peer>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&peer_id)
            .cloned()
    }

    /// Snapshot of the current peers.
    #[must_use]
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Broadcast a notification to every peer, optionally excluding one
    /// (typically the originator).
    pub async fn notify_peers(&self, method: &str, data: Value, exclude: Option<PeerId>) {
        let targets: Vec<Arc<Peer>> = {
            let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers
                .values()
                .filter(|p| exclude != Some(p.id()))
                .cloned()
                .collect()
        };

        for peer in targets {
            peer.notify(Message::new(method, data.clone())).await;
        }
    }

    /// Track a router carrying this room's media on some node.
    pub fn register_router(&self, router: Arc<Router>) {
        self.routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(router.id(), router);
    }

    /// Look up a registered router by id.
    #[must_use]
    pub fn get_router(&self, router_id: RouterId) -> Option<Arc<Router>> {
        self.routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&router_id)
            .cloned()
    }

    /// Snapshot of the routers carrying this room's media.
    #[must_use]
    pub fn routers(&self) -> Vec<Arc<Router>> {
        self.routers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Close the room: close every remaining peer and router. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(target: "rc.signaling.room", room_id = %self.id, "Room closing");

        let peers: Vec<_> = {
            let mut guard = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, p)| p).collect()
        };
        for peer in peers {
            // Boxed: peer close re-enters the room through remove_peer.
            Box::pin(peer.close()).await;
        }

        let routers: Vec<_> = {
            let mut guard = self.routers.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, r)| r).collect()
        };
        for router in routers {
            router.close().await;
        }

        self.close_token.cancel();
        rc_metrics::record_room_closed();
        debug!(target: "rc.signaling.room", room_id = %self.id, "Room closed");
    }
}
