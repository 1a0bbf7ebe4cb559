//! Observability for the room controller.
//!
//! Metrics go through the `metrics` facade; whatever recorder the deployment
//! installs receives them. Labels are bounded to prevent cardinality
//! explosion:
//! - `kind`: 2 values (notification, request)
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_messages_dispatched_total` | Counter | `kind` | Messages entering a pipeline |
//! | `rc_messages_unhandled_total` | Counter | `kind` | Messages no middleware claimed |
//! | `rc_connection_failovers_total` | Counter | none | Outbound attempts that moved to the next channel |
//! | `rc_rooms_active` | Gauge | none | Currently open rooms |
//! | `rc_pipe_transports_active` | Gauge | none | Live bridge halves across all routers |

pub mod metrics;

// Re-exports for convenience
pub use metrics::{
    record_connection_failover, record_message_dispatched, record_message_unhandled,
    record_pipe_transport_closed, record_pipe_transport_opened, record_room_closed,
    record_room_opened,
};
