//! The wire-level message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A signaling message: a method name plus a JSON data payload.
///
/// The same envelope is used for notifications (no reply) and requests
/// (exactly one eventual respond-or-reject); the transport distinguishes the
/// two delivery modes, not the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Method name, e.g. `"chatMessage"` or `"pipeTransportClosed"`.
    pub method: String,
    /// Method-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl Message {
    /// Create a message with the given method and payload.
    #[must_use]
    pub fn new(method: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into(),
            data,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trips_through_json() {
        let message = Message::new("chatMessage", json!({ "text": "hi" }));
        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_missing_data_defaults_to_null() {
        let decoded: Message = serde_json::from_str(r#"{"method":"ping"}"#).unwrap();
        assert_eq!(decoded.method, "ping");
        assert_eq!(decoded.data, Value::Null);
    }
}
