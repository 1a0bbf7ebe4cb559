//! Concrete middlewares for the peer and node pipelines.

pub mod chat;
pub mod node;

pub use chat::ChatMiddleware;
pub use node::RouterMessagesMiddleware;
