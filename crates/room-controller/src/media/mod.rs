//! Media control plane: node connections, routers, pipe transports, and the
//! consumer/producer handles living on remote media-processing nodes.

pub mod data_consumer;
pub mod node_connection;
pub mod pipe_transport;
pub mod resources;
pub mod router;

// Re-export primary types
pub use data_consumer::{DataConsumer, SctpStreamParameters};
pub use node_connection::{MediaNodeConnection, NodeContext};
pub use pipe_transport::{CloseReason, PipeTransport};
pub use router::Router;
