//! Scriptable signaling channel.
//!
//! `MockConnection` implements the controller's `Connection` trait while
//! letting the test drive both directions: inject inbound events as if the
//! client sent them, inspect everything the controller sent out, and flip
//! the channel into failing or stalling mode to exercise failover paths.

use async_trait::async_trait;
use common::types::ConnectionId;
use room_controller::errors::RcError;
use room_controller::signaling::connection::{Connection, ConnectionEvent, RequestReply};
use room_controller::signaling::Message;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Buffer size for the injected-event channel.
const EVENT_CHANNEL_BUFFER: usize = 64;

/// A signaling channel under full test control.
pub struct MockConnection {
    id: ConnectionId,
    priority: u8,
    /// When set, notify/request fail immediately with a transport error.
    fail_sends: AtomicBool,
    /// When set, notify/request never resolve; exercises caller timeouts.
    stall_sends: AtomicBool,
    sent: Mutex<Vec<Message>>,
    request_responses: Mutex<HashMap<String, Value>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    closed: AtomicBool,
}

impl MockConnection {
    /// Create a connection with the given outbound priority, plus the event
    /// receiver to hand to `Peer::add_connection`.
    pub fn new(priority: u8) -> (Arc<Self>, mpsc::Receiver<ConnectionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            priority,
            fail_sends: AtomicBool::new(false),
            stall_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            request_responses: Mutex::new(HashMap::new()),
            events_tx,
            closed: AtomicBool::new(false),
        });
        (connection, events_rx)
    }

    /// Make every subsequent send fail with a transport error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent send hang forever.
    pub fn set_stall_sends(&self, stall: bool) {
        self.stall_sends.store(stall, Ordering::SeqCst);
    }

    /// Script the reply for requests with this method.
    pub fn respond_to(&self, method: &str, response: Value) {
        self.request_responses
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
    }

    /// Everything the controller successfully sent on this channel, in order.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    /// The methods of everything sent, in order.
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.method.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver an inbound notification as if the client sent it.
    pub async fn inject_notification(&self, message: Message) {
        self.events_tx
            .send(ConnectionEvent::Notification(message))
            .await
            .expect("event receiver dropped");
    }

    /// Deliver an inbound request; the returned receiver resolves with the
    /// controller's respond-or-reject.
    pub async fn inject_request(
        &self,
        message: Message,
    ) -> oneshot::Receiver<Result<Value, String>> {
        let (tx, rx) = oneshot::channel();
        self.events_tx
            .send(ConnectionEvent::Request {
                message,
                reply: RequestReply::new(tx),
            })
            .await
            .expect("event receiver dropped");
        rx
    }

    /// Simulate the transport dropping the channel.
    pub async fn inject_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(ConnectionEvent::Closed).await;
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn notify(&self, message: Message) -> Result<(), RcError> {
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RcError::Closed("mock connection"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RcError::Transport("mock send failure".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn request(&self, message: Message) -> Result<Value, RcError> {
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RcError::Closed("mock connection"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RcError::Transport("mock send failure".to_string()));
        }
        let response = self
            .request_responses
            .lock()
            .unwrap()
            .get(&message.method)
            .cloned()
            .unwrap_or_else(|| json!({}));
        self.sent.lock().unwrap().push(message);
        Ok(response)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.events_tx.try_send(ConnectionEvent::Closed);
    }
}
