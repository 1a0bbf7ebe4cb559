//! One half of a router bridge.
//!
//! A pipe transport carries media between two routers on different nodes.
//! Transports come in pairs, one per side; each side knows its peer via a
//! weak pair link set when the bridge handshake completes. Closing either
//! side tears the whole bridge down exactly once.

use crate::errors::RcError;
use crate::media::data_consumer::{DataConsumer, DataConsumerCreated};
use crate::media::node_connection::MediaNodeConnection;
use crate::media::router::Router;
use crate::observability::metrics as rc_metrics;
use crate::signaling::Message;
use common::types::{DataConsumerId, DataProducerId, PipeTransportId, RouterId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Where a pipe-transport close originated. The reason decides which
/// follow-up actions run, so a close crossing the pair link or the node
/// channel can never echo back and loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Initiated on this side by the controller. The node is told and the
    /// pair is cascaded.
    Local,
    /// Cascaded from the paired transport. The node is told; the pair is
    /// not cascaded back.
    PairCascade,
    /// The node reported the transport gone (or its channel died). The pair
    /// is cascaded; the node is not told what it already knows.
    Remote,
}

/// Transport endpoint parameters exchanged during the bridge handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeTransportConnectParams {
    pub id: PipeTransportId,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srtp_parameters: Option<Value>,
}

/// One side of a router-to-router bridge.
pub struct PipeTransport {
    id: PipeTransportId,
    router: Weak<Router>,
    router_id: RouterId,
    remote_router_id: RouterId,
    node: Arc<MediaNodeConnection>,
    /// Set exactly once, when the handshake links the two sides.
    pair: OnceLock<Weak<PipeTransport>>,
    data_consumers: Mutex<HashMap<DataConsumerId, Arc<DataConsumer>>>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl PipeTransport {
    /// Wrap a node-created pipe transport. Spawns a watcher that treats the
    /// node channel dying as a remote close.
    pub(crate) fn new(
        id: PipeTransportId,
        router: &Arc<Router>,
        remote_router_id: RouterId,
        node: Arc<MediaNodeConnection>,
    ) -> Arc<Self> {
        let transport = Arc::new(Self {
            id,
            router: Arc::downgrade(router),
            router_id: router.id(),
            remote_router_id,
            node: Arc::clone(&node),
            pair: OnceLock::new(),
            data_consumers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&transport);
        let node_closed = node.closed_token();
        let self_closed = transport.close_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = node_closed.cancelled() => {
                    if let Some(transport) = weak.upgrade() {
                        transport.close(CloseReason::Remote).await;
                    }
                }
                () = self_closed.cancelled() => {}
            }
        });

        transport
    }

    #[must_use]
    pub fn id(&self) -> PipeTransportId {
        self.id
    }

    /// The router this side belongs to.
    #[must_use]
    pub fn router_id(&self) -> RouterId {
        self.router_id
    }

    /// The router on the far side of the bridge.
    #[must_use]
    pub fn remote_router_id(&self) -> RouterId {
        self.remote_router_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when this side closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Link this side to its pair. Only the first link sticks.
    pub(crate) fn set_pair(&self, pair: &Arc<PipeTransport>) {
        let _ = self.pair.set(Arc::downgrade(pair));
    }

    /// The paired transport on the far side, if linked and still alive.
    #[must_use]
    pub fn pair(&self) -> Option<Arc<PipeTransport>> {
        self.pair.get().and_then(Weak::upgrade)
    }

    /// Look up a live data consumer on this side.
    #[must_use]
    pub fn get_data_consumer(&self, id: DataConsumerId) -> Option<Arc<DataConsumer>> {
        self.data_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Number of live data consumers on this side.
    #[must_use]
    pub fn data_consumer_count(&self) -> usize {
        self.data_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create a data consumer relaying `data_producer_id` over this
    /// transport. When the last data consumer on this side goes away the
    /// transport closes itself, tearing down the bridge.
    ///
    /// # Errors
    ///
    /// Fails if the transport is closed or the node request fails.
    pub async fn consume_data(
        self: &Arc<Self>,
        data_producer_id: DataProducerId,
    ) -> Result<Arc<DataConsumer>, RcError> {
        if self.is_closed() {
            return Err(RcError::Closed("pipe transport"));
        }

        let reply = self
            .node
            .request(Message::new(
                "createPipeDataConsumer",
                json!({
                    "routerId": self.router_id,
                    "pipeTransportId": self.id,
                    "dataProducerId": data_producer_id,
                }),
            ))
            .await?;
        let created: DataConsumerCreated = serde_json::from_value(reply)?;

        let consumer = DataConsumer::new(
            created,
            self.router_id,
            data_producer_id,
            Arc::clone(&self.node),
        );

        // The transport may have closed while the node round trip was in
        // flight. The check shares the lock with the close drain, so the
        // consumer either lands in the map before the drain or is refused.
        let inserted = {
            let mut consumers = self
                .data_consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.is_closed() {
                false
            } else {
                consumers.insert(consumer.id(), Arc::clone(&consumer));
                true
            }
        };
        if !inserted {
            // The node-side transport teardown takes the consumer with it.
            consumer.close(true).await;
            return Err(RcError::Closed("pipe transport"));
        }

        debug!(
            target: "rc.media.pipe_transport",
            pipe_transport_id = %self.id,
            data_consumer_id = %consumer.id(),
            "Pipe data consumer created"
        );

        let transport = Arc::downgrade(self);
        let consumer_id = consumer.id();
        let consumer_closed = consumer.closed_token();
        let transport_closed = self.close_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = consumer_closed.cancelled() => {
                    if let Some(transport) = transport.upgrade() {
                        transport.on_data_consumer_closed(consumer_id).await;
                    }
                }
                () = transport_closed.cancelled() => {}
            }
        });

        Ok(consumer)
    }

    /// Drop a closed consumer; the last one closing closes the transport.
    async fn on_data_consumer_closed(&self, consumer_id: DataConsumerId) {
        let remaining = {
            let mut consumers = self
                .data_consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            consumers.remove(&consumer_id);
            consumers.len()
        };

        if remaining == 0 {
            self.close(CloseReason::Local).await;
        }
    }

    /// Close this side of the bridge. Idempotent; `reason` decides whether
    /// the node is told and whether the close cascades across the pair
    /// link. See [`CloseReason`].
    pub async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.pipe_transport",
            pipe_transport_id = %self.id,
            router_id = %self.router_id,
            ?reason,
            "Pipe transport closing"
        );

        // The node tears down the transport's consumers with the transport,
        // so the handles close as remote closes either way.
        let consumers: Vec<_> = {
            let mut guard = self
                .data_consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.drain().map(|(_, c)| c).collect()
        };
        for consumer in consumers {
            consumer.close(true).await;
        }

        if matches!(reason, CloseReason::Local | CloseReason::PairCascade) {
            let notice = Message::new(
                "closePipeTransport",
                json!({
                    "routerId": self.router_id,
                    "pipeTransportId": self.id,
                }),
            );
            if let Err(e) = self.node.notify(notice).await {
                error!(
                    target: "rc.media.pipe_transport",
                    pipe_transport_id = %self.id,
                    error = %e,
                    "Failed to notify node of pipe transport close"
                );
            }
        }

        if matches!(reason, CloseReason::Local | CloseReason::Remote) {
            if let Some(pair) = self.pair() {
                Box::pin(pair.close(CloseReason::PairCascade)).await;
            }
        }

        if let Some(router) = self.router.upgrade() {
            router.forget_pipe_transport(self.remote_router_id, self.id).await;
        }

        self.close_token.cancel();
        rc_metrics::record_pipe_transport_closed();
        debug!(
            target: "rc.media.pipe_transport",
            pipe_transport_id = %self.id,
            "Pipe transport closed"
        );
    }
}
