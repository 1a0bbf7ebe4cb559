//! Control channel to one media-processing node.
//!
//! A `MediaNodeConnection` wraps the raw [`Connection`] to a node with its
//! own middleware pipeline for node-originated traffic. Routers register a
//! middleware here for the lifetime of the router so that node notifications
//! such as `pipeTransportClosed` reach the owning object.

use crate::errors::{RcError, GENERIC_SERVER_ERROR};
use crate::observability::metrics as rc_metrics;
use crate::signaling::connection::{Connection, ConnectionEvent, RequestReply};
use crate::signaling::{Message, Pipeline};
use common::types::ConnectionId;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Dispatch context for node-originated messages.
pub struct NodeContext {
    /// The inbound message from the node.
    pub message: Message,
    /// Response payload for node-originated requests.
    pub response: serde_json::Map<String, Value>,
    /// Whether some middleware recognized the method.
    pub handled: bool,
}

/// The control channel to one media node.
pub struct MediaNodeConnection {
    connection: Arc<dyn Connection>,
    pipeline: Pipeline<NodeContext>,
    closed: AtomicBool,
    close_token: CancellationToken,
    request_timeout: Duration,
}

impl MediaNodeConnection {
    /// Wrap an established node channel and start pumping its inbound
    /// events through the node pipeline.
    #[must_use]
    pub fn new(
        connection: Arc<dyn Connection>,
        events: mpsc::Receiver<ConnectionEvent>,
        request_timeout: Duration,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            connection,
            pipeline: Pipeline::new(),
            closed: AtomicBool::new(false),
            close_token: CancellationToken::new(),
            request_timeout,
        });

        let pump = Arc::clone(&node);
        tokio::spawn(async move {
            pump.pump_events(events).await;
        });

        node
    }

    /// Identifier of the underlying channel.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// The pipeline node-originated messages run through. Routers register
    /// their middleware here and remove it when they close.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline<NodeContext> {
        &self.pipeline
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Token cancelled exactly once, when the node channel closes. Routers
    /// and pipe transports watch it to fail fast when the node goes away.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.close_token.clone()
    }

    async fn pump_events(self: Arc<Self>, mut events: mpsc::Receiver<ConnectionEvent>) {
        loop {
            tokio::select! {
                () = self.close_token.cancelled() => break,

                event = events.recv() => match event {
                    Some(ConnectionEvent::Notification(message)) => {
                        self.dispatch(message, None).await;
                    }
                    Some(ConnectionEvent::Request { message, reply }) => {
                        self.dispatch(message, Some(reply)).await;
                    }
                    Some(ConnectionEvent::Closed) | None => {
                        self.close();
                        break;
                    }
                },
            }
        }
    }

    async fn dispatch(&self, message: Message, reply: Option<RequestReply>) {
        let kind = if reply.is_some() { "request" } else { "notification" };
        rc_metrics::record_message_dispatched(kind);
        let method = message.method.clone();

        let mut ctx = NodeContext {
            message,
            response: serde_json::Map::new(),
            handled: false,
        };

        match self.pipeline.execute(&mut ctx).await {
            Ok(()) if ctx.handled => {
                if let Some(reply) = reply {
                    reply.respond(Value::Object(ctx.response));
                }
            }
            Ok(()) => {
                rc_metrics::record_message_unhandled(kind);
                error!(
                    target: "rc.media.node",
                    connection_id = %self.connection.id(),
                    method = %method,
                    "No middleware handled the node message"
                );
                if let Some(reply) = reply {
                    reply.reject(GENERIC_SERVER_ERROR);
                }
            }
            Err(e) => {
                error!(
                    target: "rc.media.node",
                    connection_id = %self.connection.id(),
                    method = %method,
                    error = %e,
                    "Node message dispatch failed"
                );
                if let Some(reply) = reply {
                    reply.reject(e.client_message());
                }
            }
        }
    }

    /// Send a notification to the node.
    ///
    /// # Errors
    ///
    /// Fails if the channel is closed or delivery fails within the timeout.
    pub async fn notify(&self, message: Message) -> Result<(), RcError> {
        if self.is_closed() {
            return Err(RcError::Closed("media node connection"));
        }
        match timeout(self.request_timeout, self.connection.notify(message)).await {
            Ok(result) => result,
            Err(_) => Err(RcError::Timeout),
        }
    }

    /// Send a request to the node and await its reply.
    ///
    /// # Errors
    ///
    /// Fails if the channel is closed, the node rejects, or the reply does
    /// not arrive within the timeout.
    pub async fn request(&self, message: Message) -> Result<Value, RcError> {
        if self.is_closed() {
            return Err(RcError::Closed("media node connection"));
        }
        match timeout(self.request_timeout, self.connection.request(message)).await {
            Ok(Ok(value)) => Ok(value),
            // The channel delivered but the node refused; surface it as the
            // node's failure, not the transport's.
            Ok(Err(RcError::Transport(reason))) => Err(RcError::MediaNode(reason)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RcError::Timeout),
        }
    }

    /// Close the channel. Idempotent; cancels the closed token so every
    /// dependent router and transport can clean up.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            target: "rc.media.node",
            connection_id = %self.connection.id(),
            "Media node connection closed"
        );

        self.connection.close();
        self.close_token.cancel();
    }
}
