//! Scriptable media-processing node.
//!
//! `MockMediaNode` stands in for a node on the far end of a control channel.
//! Tests register per-method handlers for control RPCs, inspect what the
//! controller sent, and push node-originated notifications through a real
//! `MediaNodeConnection` pipeline.

use async_trait::async_trait;
use common::types::ConnectionId;
use room_controller::errors::RcError;
use room_controller::media::MediaNodeConnection;
use room_controller::signaling::connection::{Connection, ConnectionEvent};
use room_controller::signaling::Message;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffer size for the injected-event channel.
const EVENT_CHANNEL_BUFFER: usize = 64;

type Handler = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// The node's half of the control channel.
struct NodeChannel {
    id: ConnectionId,
    handlers: Mutex<HashMap<String, Handler>>,
    /// Methods that fail with a transport error instead of answering.
    fail_methods: Mutex<HashSet<String>>,
    notifications: Mutex<Vec<Message>>,
    requests: Mutex<Vec<Message>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for NodeChannel {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn priority(&self) -> u8 {
        0
    }

    async fn notify(&self, message: Message) -> Result<(), RcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RcError::Closed("mock media node"));
        }
        if self.fail_methods.lock().unwrap().contains(&message.method) {
            return Err(RcError::Transport("mock node failure".to_string()));
        }
        self.notifications.lock().unwrap().push(message);
        Ok(())
    }

    async fn request(&self, message: Message) -> Result<Value, RcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RcError::Closed("mock media node"));
        }
        if self.fail_methods.lock().unwrap().contains(&message.method) {
            return Err(RcError::Transport("mock node failure".to_string()));
        }
        self.requests.lock().unwrap().push(message.clone());
        let handlers = self.handlers.lock().unwrap();
        match handlers.get(&message.method) {
            Some(handler) => Ok(handler(&message.data)),
            None => Err(RcError::Transport(format!(
                "mock media node has no handler for {}",
                message.method
            ))),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.events_tx.try_send(ConnectionEvent::Closed);
    }
}

/// A media node under full test control.
pub struct MockMediaNode {
    channel: Arc<NodeChannel>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    next_port: AtomicU16,
}

impl MockMediaNode {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_BUFFER);
        Self {
            channel: Arc::new(NodeChannel {
                id: ConnectionId::new(),
                handlers: Mutex::new(HashMap::new()),
                fail_methods: Mutex::new(HashSet::new()),
                notifications: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                events_tx: events_tx.clone(),
                closed: AtomicBool::new(false),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_port: AtomicU16::new(40000),
        }
    }

    /// Register a handler answering requests with this method.
    pub fn handle(&self, method: &str, handler: impl Fn(&Value) -> Value + Send + Sync + 'static) {
        self.channel
            .handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(handler));
    }

    /// Register a handler returning a fixed reply.
    pub fn handle_with(&self, method: &str, response: Value) {
        self.handle(method, move |_| response.clone());
    }

    /// Register handlers for the standard router and bridge RPCs: routers
    /// and pipe transports get fresh ids, connects succeed, and pipe data
    /// consumers come back with plausible SCTP parameters.
    pub fn install_default_handlers(&self) {
        self.handle("getRouter", |_| json!({ "id": uuid::Uuid::new_v4() }));

        let port_counter = Arc::new(AtomicU16::new(
            self.next_port.load(Ordering::SeqCst),
        ));
        self.handle("createPipeTransport", move |_| {
            let port = port_counter.fetch_add(1, Ordering::SeqCst);
            json!({
                "id": uuid::Uuid::new_v4(),
                "ip": "10.0.0.1",
                "port": port,
            })
        });

        self.handle_with("connectPipeTransport", json!({}));

        self.handle("createPipeDataConsumer", |_| {
            json!({
                "id": uuid::Uuid::new_v4(),
                "sctpStreamParameters": { "streamId": 1, "ordered": true },
                "label": "chat",
                "protocol": "chat",
            })
        });
    }

    /// Make requests and notifications with this method fail with a
    /// transport error.
    pub fn fail_method(&self, method: &str) {
        self.channel
            .fail_methods
            .lock()
            .unwrap()
            .insert(method.to_string());
    }

    /// Every notification the controller sent to this node, in order.
    pub fn notifications(&self) -> Vec<Message> {
        self.channel.notifications.lock().unwrap().clone()
    }

    /// How many notifications with this method the controller sent.
    pub fn notification_count(&self, method: &str) -> usize {
        self.channel
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.method == method)
            .count()
    }

    /// Every request the controller sent to this node, in order.
    pub fn requests(&self) -> Vec<Message> {
        self.channel.requests.lock().unwrap().clone()
    }

    /// Build the controller-side `MediaNodeConnection` for this node.
    /// Consumes the inbound event stream; calling twice panics.
    pub fn connect(&self, request_timeout: Duration) -> Arc<MediaNodeConnection> {
        let events_rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("connect called twice");
        MediaNodeConnection::new(
            Arc::clone(&self.channel) as Arc<dyn Connection>,
            events_rx,
            request_timeout,
        )
    }

    /// Push a node-originated notification into the controller.
    pub async fn notify_controller(&self, message: Message) {
        self.events_tx
            .send(ConnectionEvent::Notification(message))
            .await
            .expect("event receiver dropped");
    }

    /// Simulate the node dropping the control channel.
    pub async fn drop_channel(&self) {
        self.channel.closed.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(ConnectionEvent::Closed).await;
    }
}

impl Default for MockMediaNode {
    fn default() -> Self {
        Self::new()
    }
}
