//! Room chat.

use crate::authorization::{has_permission, Permission};
use crate::errors::RcError;
use crate::signaling::peer::PeerContext;
use crate::signaling::room::Room;
use crate::signaling::{Middleware, Next};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Weak;

#[derive(Debug, Deserialize)]
struct ChatPayload {
    text: String,
}

/// Relays `chatMessage` notifications to the rest of the room.
pub struct ChatMiddleware {
    room: Weak<Room>,
}

impl ChatMiddleware {
    #[must_use]
    pub fn new(room: Weak<Room>) -> Self {
        Self { room }
    }
}

#[async_trait]
impl Middleware<PeerContext> for ChatMiddleware {
    async fn handle(
        &self,
        ctx: &mut PeerContext,
        next: Next<'_, PeerContext>,
    ) -> Result<(), RcError> {
        if ctx.message.method == "chatMessage" {
            if !has_permission(&ctx.peer, Permission::SendChat) {
                return Err(RcError::PermissionDenied("chatMessage".to_string()));
            }

            let payload: ChatPayload = serde_json::from_value(ctx.message.data.clone())?;

            if let Some(room) = self.room.upgrade() {
                room.notify_peers(
                    "chatMessage",
                    json!({
                        "peerId": ctx.peer.id(),
                        "displayName": ctx.peer.display_name(),
                        "text": payload.text,
                        "timestamp": chrono::Utc::now().timestamp_millis(),
                    }),
                    Some(ctx.peer.id()),
                )
                .await;
            }

            ctx.handled = true;
        }

        next.run(ctx).await
    }
}
