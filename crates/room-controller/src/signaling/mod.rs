//! Signaling: message envelope, middleware pipeline, connection abstraction,
//! peer multiplexing, rooms, and the connection entry point.

pub mod connection;
pub mod message;
pub mod peer;
pub mod pipeline;
pub mod room;
pub mod server_manager;

// Re-export primary types
pub use connection::{Connection, ConnectionEvent, RequestReply};
pub use message::Message;
pub use peer::{Peer, PeerContext, PeerInfo};
pub use pipeline::{Middleware, Next, Pipeline};
pub use room::Room;
pub use server_manager::ServerManager;
