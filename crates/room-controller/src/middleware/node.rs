//! Node-originated router messages.
//!
//! One `RouterMessagesMiddleware` per router is registered on the owning
//! node's pipeline. Each instance claims only messages naming its router, so
//! several routers on one node channel coexist without stealing each other's
//! traffic.

use crate::errors::RcError;
use crate::media::node_connection::NodeContext;
use crate::media::pipe_transport::CloseReason;
use crate::media::router::Router;
use crate::signaling::{Middleware, Next};
use async_trait::async_trait;
use common::types::{DataConsumerId, PipeTransportId, RouterId};
use serde::Deserialize;
use std::sync::Weak;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipeTransportClosedPayload {
    router_id: RouterId,
    pipe_transport_id: PipeTransportId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseDataConsumerPayload {
    router_id: RouterId,
    data_consumer_id: DataConsumerId,
}

/// Handles node notifications targeting one router.
pub struct RouterMessagesMiddleware {
    router: Weak<Router>,
}

impl RouterMessagesMiddleware {
    #[must_use]
    pub fn new(router: Weak<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Middleware<NodeContext> for RouterMessagesMiddleware {
    async fn handle(
        &self,
        ctx: &mut NodeContext,
        next: Next<'_, NodeContext>,
    ) -> Result<(), RcError> {
        match ctx.message.method.as_str() {
            "pipeTransportClosed" => {
                let payload: PipeTransportClosedPayload =
                    serde_json::from_value(ctx.message.data.clone())?;

                if let Some(router) = self.router.upgrade() {
                    if router.id() == payload.router_id {
                        // The node already dropped the transport; a stale or
                        // repeated notice finds nothing and stays a no-op.
                        if let Some(transport) =
                            router.find_pipe_transport(payload.pipe_transport_id).await
                        {
                            transport.close(CloseReason::Remote).await;
                        } else {
                            debug!(
                                target: "rc.middleware.node",
                                router_id = %payload.router_id,
                                pipe_transport_id = %payload.pipe_transport_id,
                                "Close notice for unknown pipe transport"
                            );
                        }
                        ctx.handled = true;
                    }
                }
            }
            "closeDataConsumer" => {
                let payload: CloseDataConsumerPayload =
                    serde_json::from_value(ctx.message.data.clone())?;

                if let Some(router) = self.router.upgrade() {
                    if router.id() == payload.router_id {
                        if let Some(consumer) =
                            router.find_data_consumer(payload.data_consumer_id).await
                        {
                            consumer.close(true).await;
                        } else {
                            debug!(
                                target: "rc.middleware.node",
                                router_id = %payload.router_id,
                                data_consumer_id = %payload.data_consumer_id,
                                "Close notice for unknown data consumer"
                            );
                        }
                        ctx.handled = true;
                    }
                }
            }
            _ => {}
        }

        next.run(ctx).await
    }
}
