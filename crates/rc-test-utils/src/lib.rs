//! # RC Test Utilities
//!
//! Shared test utilities for the Roomcast Room Controller.
//!
//! This crate provides mock implementations for isolated controller testing
//! without real signaling sockets or media-processing nodes.
//!
//! ## Modules
//!
//! - `mock_connection` - Scriptable signaling channel for peer tests
//! - `mock_media_node` - Scriptable media node behind a real
//!   `MediaNodeConnection`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::{MockConnection, MockMediaNode};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     // A signaling channel the test drives directly
//!     let (conn, events) = MockConnection::new(1);
//!     peer.add_connection(conn.clone(), events).await;
//!     conn.inject_notification(Message::new("chatMessage", json!({"text": "hi"})));
//!
//!     // A media node that answers control RPCs from scripted handlers
//!     let node = MockMediaNode::new();
//!     node.install_default_handlers();
//!     let node_connection = node.connect(Duration::from_millis(100));
//! }
//! ```

pub mod mock_connection;
pub mod mock_media_node;

pub use mock_connection::MockConnection;
pub use mock_media_node::MockMediaNode;
