//! Room Controller error types.
//!
//! Clients are always rejected with the generic server error; the variants
//! exist for server-side logging and bounded metrics labels. Internal details
//! never leak to clients.

use thiserror::Error;

/// The reply sent to a client whose request could not be served.
///
/// Intentionally generic: protocol errors, middleware failures, and internal
/// faults are indistinguishable from the client's point of view. Retrying is
/// the client's responsibility.
pub const GENERIC_SERVER_ERROR: &str = "Server error";

/// Room Controller error type.
#[derive(Debug, Error)]
pub enum RcError {
    /// A connection's send or receive failed at the transport level.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An outbound request did not complete within its bounded wait.
    /// Treated identically to a transport failure.
    #[error("Request timed out")]
    Timeout,

    /// Operation attempted on an already-closed resource.
    #[error("{0} is closed")]
    Closed(&'static str),

    /// Peer lacks the permission a middleware requires.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An RPC call to a media-processing node failed.
    #[error("Media node error: {0}")]
    MediaNode(String),

    /// Message payload could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error with context.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns a bounded label string for the error variant (for metrics).
    ///
    /// Uses enum variant names, not error message content, so label
    /// cardinality stays bounded.
    #[must_use]
    pub fn error_type_label(&self) -> &'static str {
        match self {
            RcError::Transport(_) => "transport",
            RcError::Timeout => "timeout",
            RcError::Closed(_) => "closed",
            RcError::PermissionDenied(_) => "permission_denied",
            RcError::MediaNode(_) => "media_node",
            RcError::Serialization(_) => "serialization",
            RcError::Internal(_) => "internal",
        }
    }

    /// Returns the client-safe reply for this error.
    ///
    /// Always [`GENERIC_SERVER_ERROR`]; details stay server-side.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        GENERIC_SERVER_ERROR
    }
}

impl From<serde_json::Error> for RcError {
    fn from(err: serde_json::Error) -> Self {
        RcError::Serialization(err.to_string())
    }
}

impl From<common::token::TokenError> for RcError {
    fn from(err: common::token::TokenError) -> Self {
        RcError::Internal(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_label_exhaustive() {
        assert_eq!(
            RcError::Transport("conn reset".to_string()).error_type_label(),
            "transport"
        );
        assert_eq!(RcError::Timeout.error_type_label(), "timeout");
        assert_eq!(RcError::Closed("peer").error_type_label(), "closed");
        assert_eq!(
            RcError::PermissionDenied("chat".to_string()).error_type_label(),
            "permission_denied"
        );
        assert_eq!(
            RcError::MediaNode("rpc failed".to_string()).error_type_label(),
            "media_node"
        );
        assert_eq!(
            RcError::Serialization("bad json".to_string()).error_type_label(),
            "serialization"
        );
        assert_eq!(
            RcError::Internal("oops".to_string()).error_type_label(),
            "internal"
        );
    }

    #[test]
    fn test_client_message_never_leaks_details() {
        let err = RcError::Transport("connection refused at 10.0.0.12:4443".to_string());
        assert_eq!(err.client_message(), GENERIC_SERVER_ERROR);

        let err = RcError::Internal("signing key rotation failed".to_string());
        assert_eq!(err.client_message(), GENERIC_SERVER_ERROR);
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RcError::MediaNode("foo".to_string())),
            "Media node error: foo"
        );
        assert_eq!(format!("{}", RcError::Timeout), "Request timed out");
        assert_eq!(format!("{}", RcError::Closed("peer")), "peer is closed");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: RcError = json_err.into();
        assert!(matches!(err, RcError::Serialization(_)));
    }
}
