//! Metric definitions for the room controller.
//!
//! Naming follows Prometheus conventions:
//! - `rc_` prefix for room controller
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 2 values (notification, request)

use metrics::{counter, gauge};

/// Record a message entering a dispatch pipeline.
///
/// Metric: `rc_messages_dispatched_total`
/// Labels: `kind` (notification, request)
pub fn record_message_dispatched(kind: &str) {
    counter!("rc_messages_dispatched_total", "kind" => kind.to_string()).increment(1);
}

/// Record a message that ran the whole pipeline unclaimed.
///
/// Metric: `rc_messages_unhandled_total`
/// Labels: `kind` (notification, request)
///
/// Non-zero rates usually mean a client or node speaks a method this
/// controller does not implement.
pub fn record_message_unhandled(kind: &str) {
    counter!("rc_messages_unhandled_total", "kind" => kind.to_string()).increment(1);
}

/// Record one outbound attempt moving on to the next connection.
///
/// Metric: `rc_connection_failovers_total`
/// Labels: none
///
/// Counts per-attempt failures, not per-message ones; a message that walks
/// three dead channels counts three times.
pub fn record_connection_failover() {
    counter!("rc_connection_failovers_total").increment(1);
}

/// A room opened.
///
/// Metric: `rc_rooms_active`
/// Labels: none
pub fn record_room_opened() {
    gauge!("rc_rooms_active").increment(1.0);
}

/// A room closed.
///
/// Metric: `rc_rooms_active`
/// Labels: none
pub fn record_room_closed() {
    gauge!("rc_rooms_active").decrement(1.0);
}

/// One side of a router bridge came up.
///
/// Metric: `rc_pipe_transports_active`
/// Labels: none
///
/// A full bridge counts twice, once per side.
pub fn record_pipe_transport_opened() {
    gauge!("rc_pipe_transports_active").increment(1.0);
}

/// One side of a router bridge went away.
///
/// Metric: `rc_pipe_transports_active`
/// Labels: none
pub fn record_pipe_transport_closed() {
    gauge!("rc_pipe_transports_active").decrement(1.0);
}
