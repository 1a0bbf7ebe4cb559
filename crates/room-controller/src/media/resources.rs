//! Peer-owned media resource handles.
//!
//! Transports, producers, and consumers live on media nodes; the controller
//! only keeps thin handles so that closing a peer tears its server-side
//! state down. The same remote-close convention applies everywhere: a close
//! the node initiated is not echoed back to it.

use crate::media::node_connection::MediaNodeConnection;
use crate::signaling::Message;
use common::types::{ConsumerId, ProducerId, RouterId, TransportId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// A peer-facing transport on a media node.
pub struct WebRtcTransport {
    id: TransportId,
    router_id: RouterId,
    node: Arc<MediaNodeConnection>,
    closed: AtomicBool,
}

impl WebRtcTransport {
    #[must_use]
    pub fn new(id: TransportId, router_id: RouterId, node: Arc<MediaNodeConnection>) -> Arc<Self> {
        Arc::new(Self {
            id,
            router_id,
            node,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    #[must_use]
    pub fn router_id(&self) -> RouterId {
        self.router_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the transport. Idempotent; a local close instructs the node.
    pub async fn close(&self, remote_close: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.resources",
            transport_id = %self.id,
            remote_close,
            "Transport closing"
        );

        if !remote_close {
            let notice = Message::new(
                "closeTransport",
                json!({ "routerId": self.router_id, "transportId": self.id }),
            );
            if let Err(e) = self.node.notify(notice).await {
                error!(
                    target: "rc.media.resources",
                    transport_id = %self.id,
                    error = %e,
                    "Failed to notify node of transport close"
                );
            }
        }
    }
}

/// A media producer on a media node.
pub struct Producer {
    id: ProducerId,
    router_id: RouterId,
    kind: MediaKind,
    node: Arc<MediaNodeConnection>,
    closed: AtomicBool,
}

impl Producer {
    #[must_use]
    pub fn new(
        id: ProducerId,
        router_id: RouterId,
        kind: MediaKind,
        node: Arc<MediaNodeConnection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            router_id,
            kind,
            node,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> ProducerId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the producer. Idempotent; a local close instructs the node.
    pub async fn close(&self, remote_close: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.resources",
            producer_id = %self.id,
            remote_close,
            "Producer closing"
        );

        if !remote_close {
            let notice = Message::new(
                "closeProducer",
                json!({ "routerId": self.router_id, "producerId": self.id }),
            );
            if let Err(e) = self.node.notify(notice).await {
                error!(
                    target: "rc.media.resources",
                    producer_id = %self.id,
                    error = %e,
                    "Failed to notify node of producer close"
                );
            }
        }
    }
}

/// A media consumer on a media node.
pub struct Consumer {
    id: ConsumerId,
    router_id: RouterId,
    producer_id: ProducerId,
    kind: MediaKind,
    node: Arc<MediaNodeConnection>,
    closed: AtomicBool,
}

impl Consumer {
    #[must_use]
    pub fn new(
        id: ConsumerId,
        router_id: RouterId,
        producer_id: ProducerId,
        kind: MediaKind,
        node: Arc<MediaNodeConnection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            router_id,
            producer_id,
            kind,
            node,
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// The producer this consumer is subscribed to.
    #[must_use]
    pub fn producer_id(&self) -> ProducerId {
        self.producer_id
    }

    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the consumer. Idempotent; a local close instructs the node.
    pub async fn close(&self, remote_close: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.resources",
            consumer_id = %self.id,
            remote_close,
            "Consumer closing"
        );

        if !remote_close {
            let notice = Message::new(
                "closeConsumer",
                json!({ "routerId": self.router_id, "consumerId": self.id }),
            );
            if let Err(e) = self.node.notify(notice).await {
                error!(
                    target: "rc.media.resources",
                    consumer_id = %self.id,
                    error = %e,
                    "Failed to notify node of consumer close"
                );
            }
        }
    }
}
