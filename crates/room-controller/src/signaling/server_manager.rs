//! The connection entry point.
//!
//! `ServerManager` owns the rooms on this controller instance and turns each
//! accepted signaling channel into a peer attachment: a valid resumption
//! token re-attaches the channel to the live peer it names, anything else
//! creates a fresh peer with a freshly minted token.

use crate::errors::RcError;
use crate::signaling::connection::{Connection, ConnectionEvent};
use crate::signaling::{Peer, Room};
use common::token::TokenSigner;
use common::types::{PeerId, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the rooms and dispatches incoming connections to peers.
pub struct ServerManager {
    rooms: Mutex<HashMap<RoomId, Arc<Room>>>,
    token_signer: TokenSigner,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl ServerManager {
    /// Create a manager with no rooms.
    #[must_use]
    pub fn new(token_signer: TokenSigner, request_timeout: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            token_signer,
            request_timeout,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of currently open rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// The room with this id, if open.
    #[must_use]
    pub fn get_room(&self, room_id: RoomId) -> Option<Arc<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&room_id)
            .filter(|room| !room.is_closed())
            .cloned()
    }

    /// Attach an accepted signaling channel to a peer in `room_id`.
    ///
    /// A valid resumption token naming a live peer of the room re-attaches
    /// the channel to that peer. An absent, invalid, or stale token creates
    /// a fresh peer with a freshly minted token instead; token problems are
    /// never surfaced to the client as errors.
    ///
    /// # Errors
    ///
    /// Fails if the manager is shut down or the new peer's token cannot be
    /// minted.
    pub async fn handle_connection(
        &self,
        connection: Arc<dyn Connection>,
        events: mpsc::Receiver<ConnectionEvent>,
        room_id: RoomId,
        token: Option<&str>,
        display_name: String,
    ) -> Result<Arc<Peer>, RcError> {
        if self.is_closed() {
            connection.close();
            return Err(RcError::Closed("server manager"));
        }

        let room = self.get_or_create_room(room_id);

        if let Some(token) = token {
            match self.token_signer.verify(token) {
                Ok(resumed_id) => {
                    if let Some(peer) = room.get_peer(resumed_id) {
                        info!(
                            target: "rc.signaling.server",
                            peer_id = %peer.id(),
                            room_id = %room_id,
                            connection_id = %connection.id(),
                            "Resuming peer session"
                        );
                        peer.add_connection(connection, events).await;
                        return Ok(peer);
                    }
                    debug!(
                        target: "rc.signaling.server",
                        peer_id = %resumed_id,
                        room_id = %room_id,
                        "Token names no live peer, creating a new one"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "rc.signaling.server",
                        room_id = %room_id,
                        error = %e,
                        "Resumption token rejected, creating a new peer"
                    );
                }
            }
        }

        let peer_id = PeerId::default();
        let token = self.token_signer.sign(peer_id)?;
        let peer = Peer::new(peer_id, room_id, display_name, token, self.request_timeout);

        info!(
            target: "rc.signaling.server",
            peer_id = %peer_id,
            room_id = %room_id,
            connection_id = %connection.id(),
            "New peer"
        );

        room.add_peer(Arc::clone(&peer)).await;
        peer.add_connection(connection, events).await;
        Ok(peer)
    }

    /// The open room with this id, creating it if absent. A closed room
    /// still lingering in the map is replaced.
    fn get_or_create_room(&self, room_id: RoomId) -> Arc<Room> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        match rooms.get(&room_id) {
            Some(room) if !room.is_closed() => Arc::clone(room),
            _ => {
                let room = Room::new(room_id);
                rooms.insert(room_id, Arc::clone(&room));
                room
            }
        }
    }

    /// Shut down: close every room (which closes every peer). Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(target: "rc.signaling.server", "Server manager shutting down");

        let rooms: Vec<_> = {
            let mut guard = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, room)| room).collect()
        };
        for room in rooms {
            room.close().await;
        }
    }
}
