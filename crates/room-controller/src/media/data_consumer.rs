//! Relayed data consumer living on a remote media node.
//!
//! A `DataConsumer` is a handle to server-side state: the node does the
//! relaying, this object tracks identity and lifecycle. Closes travel in
//! both directions, so every close carries its origin to decide whether the
//! node still needs to be told.

use crate::media::node_connection::MediaNodeConnection;
use crate::signaling::Message;
use common::types::{DataConsumerId, DataProducerId, RouterId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// SCTP stream settings negotiated for a data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpStreamParameters {
    pub stream_id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_packet_life_time: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
}

/// Node reply payload for a data-consumer creation request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataConsumerCreated {
    pub id: DataConsumerId,
    #[serde(default)]
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Handle to one data consumer on a media node.
pub struct DataConsumer {
    id: DataConsumerId,
    router_id: RouterId,
    data_producer_id: DataProducerId,
    sctp_stream_parameters: Option<SctpStreamParameters>,
    label: Option<String>,
    protocol: Option<String>,
    node: Arc<MediaNodeConnection>,
    closed: AtomicBool,
    close_token: CancellationToken,
}

impl DataConsumer {
    pub(crate) fn new(
        created: DataConsumerCreated,
        router_id: RouterId,
        data_producer_id: DataProducerId,
        node: Arc<MediaNodeConnection>,
    ) -> Arc<Self> {
        let node_closed = node.closed_token();
        let consumer = Arc::new(Self {
            id: created.id,
            router_id,
            data_producer_id,
            sctp_stream_parameters: created.sctp_stream_parameters,
            label: created.label,
            protocol: created.protocol,
            node,
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
        });

        // A dead node takes its consumers with it, whether or not the owning
        // transport notices first.
        let weak = Arc::downgrade(&consumer);
        let self_closed = consumer.close_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = node_closed.cancelled() => {
                    if let Some(consumer) = weak.upgrade() {
                        consumer.close(true).await;
                    }
                }
                () = self_closed.cancelled() => {}
            }
        });

        consumer
    }

    #[must_use]
    pub fn id(&self) -> DataConsumerId {
        self.id
    }

    /// The router this consumer lives on.
    #[must_use]
    pub fn router_id(&self) -> RouterId {
        self.router_id
    }

    /// The data producer this consumer relays.
    #[must_use]
    pub fn data_producer_id(&self) -> DataProducerId {
        self.data_producer_id
    }

    #[must_use]
    pub fn sctp_stream_parameters(&self) -> Option<&SctpStreamParameters> {
        self.sctp_stream_parameters.as_ref()
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when the consumer closes. The owning
    /// transport watches it to drop its reference.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    /// Close the consumer. Idempotent.
    ///
    /// `remote_close` records where the close originated: a remote-initiated
    /// close means the node already dropped its state, so no close
    /// instruction is sent back. A local close tells the node to tear the
    /// consumer down.
    pub async fn close(&self, remote_close: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.data_consumer",
            data_consumer_id = %self.id,
            router_id = %self.router_id,
            remote_close,
            "Data consumer closing"
        );

        if !remote_close {
            let notice = Message::new(
                "closeDataConsumer",
                json!({
                    "routerId": self.router_id,
                    "dataConsumerId": self.id,
                }),
            );
            if let Err(e) = self.node.notify(notice).await {
                error!(
                    target: "rc.media.data_consumer",
                    data_consumer_id = %self.id,
                    error = %e,
                    "Failed to notify node of data consumer close"
                );
            }
        }

        self.close_token.cancel();
    }
}
