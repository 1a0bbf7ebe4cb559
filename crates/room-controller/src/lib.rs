//! Roomcast Room Controller Library
//!
//! This library provides the core functionality for the Roomcast Room
//! Controller - the signaling control plane that lets one logical conference
//! room span multiple independently scaled media-processing nodes:
//!
//! - Middleware dispatch pipeline for inbound signaling messages
//! - Peer multiplexing over several simultaneous signaling channels with
//!   priority-ordered outbound failover
//! - Router pairing across media-processing nodes via a two-phase
//!   pipe-transport handshake
//! - Relayed data-channel lifecycle with a symmetric, loop-free close protocol
//!
//! Actual audio/video processing lives on external media-processing nodes and
//! is reached exclusively through a control RPC channel
//! ([`media::MediaNodeConnection`]); this crate never touches RTP.
//!
//! # Architecture
//!
//! ```text
//! ServerManager (one per controller instance)
//! ├── Room (one per active room)
//! │   ├── Peer (one per participant, N signaling Connections each)
//! │   │   └── Pipeline<PeerContext> (shared middleware chain)
//! │   └── Router (one per room per media-processing node)
//! │       └── PipeTransport (one half of a node↔node bridge)
//! │           └── DataConsumer (relayed data channel)
//! └── MediaNodeConnection (control RPC channel per node)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Non-short-circuiting pipeline**: every middleware runs for every
//!   message, even after one marks it handled, so trailing middlewares
//!   always observe the final message
//! - **No automatic retries**: outbound failover walks existing connections
//!   once, in priority order; bridge operations surface failures and roll
//!   back partial state
//! - **Idempotent teardown**: every closable resource guards its close path
//!   with a flag set in the same uninterrupted step it is checked
//! - **CancellationToken propagation**: close signals fan out through
//!   `tokio_util::sync::CancellationToken` so every subscriber observes a
//!   close exactly once
//!
//! # Modules
//!
//! - [`signaling`] - Pipeline, Connection trait, Peer multiplexer, Room,
//!   ServerManager
//! - [`media`] - MediaNodeConnection, Router, PipeTransport, DataConsumer
//! - [`middleware`] - built-in middlewares for the peer and node pipelines
//! - [`authorization`] - roles and permission checks
//! - [`config`] - service configuration from environment
//! - [`observability`] - metric definitions
//! - [`errors`] - error types

pub mod authorization;
pub mod config;
pub mod errors;
pub mod media;
pub mod middleware;
pub mod observability;
pub mod signaling;
