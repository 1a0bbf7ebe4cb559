//! The connection abstraction.
//!
//! A [`Connection`] is one physical channel: a signaling socket to a client,
//! or a control channel to a media-processing node. The trait is the outbound
//! half; inbound traffic arrives on an [`ConnectionEvent`] stream that the
//! transport adapter hands over together with the connection at attach time.
//!
//! Priority is assigned once, when the transport accepts the channel: a
//! freshly resumed channel gets a lower (preferred) priority than a stale
//! one. Lower number wins.

use crate::errors::RcError;
use crate::signaling::Message;
use async_trait::async_trait;
use common::types::ConnectionId;
use serde_json::Value;
use tokio::sync::oneshot;

/// Reply channel for one inbound request.
///
/// Exactly one of [`respond`](RequestReply::respond) or
/// [`reject`](RequestReply::reject) must be called; dropping the reply
/// without answering surfaces as a transport failure on the requesting side.
#[derive(Debug)]
pub struct RequestReply {
    sender: oneshot::Sender<Result<Value, String>>,
}

impl RequestReply {
    /// Wrap a oneshot sender as a reply handle.
    #[must_use]
    pub fn new(sender: oneshot::Sender<Result<Value, String>>) -> Self {
        Self { sender }
    }

    /// Answer the request with a payload.
    pub fn respond(self, data: Value) {
        let _ = self.sender.send(Ok(data));
    }

    /// Reject the request with a reason string.
    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.sender.send(Err(reason.into()));
    }
}

/// One inbound event from a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A fire-and-forget notification.
    Notification(Message),

    /// A request expecting exactly one respond-or-reject.
    Request {
        message: Message,
        reply: RequestReply,
    },

    /// The underlying transport closed. Terminal; no further events follow.
    Closed,
}

/// Capability abstraction over one physical channel.
///
/// Implemented by each transport kind (signaling socket adapters, the
/// inter-node control link, test mocks). All methods may be called
/// concurrently from multiple tasks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable identifier for this channel.
    fn id(&self) -> ConnectionId;

    /// Outbound preference; lower is attempted first. Assigned once at
    /// attach time.
    fn priority(&self) -> u8;

    /// Send a notification. Resolves on transport delivery; no
    /// application-level acknowledgement exists.
    ///
    /// # Errors
    ///
    /// Returns a transport error if delivery failed.
    async fn notify(&self, message: Message) -> Result<(), RcError>;

    /// Send a request and await its correlated reply.
    ///
    /// # Errors
    ///
    /// Returns a transport error on delivery failure or rejection. Callers
    /// bound the wait; an elapsed timeout is treated as a transport failure.
    async fn request(&self, message: Message) -> Result<Value, RcError>;

    /// Close the channel. Idempotent; the event stream ends with
    /// [`ConnectionEvent::Closed`].
    fn close(&self);
}
