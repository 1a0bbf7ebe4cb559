//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values such as token signing keys and credentials.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding a secret gets safe logging behavior, and the
//! value is zeroized on drop. Access to the inner value always goes through
//! an explicit `expose_secret()` call.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct SignerConfig {
//!     key_id: String,
//!     signing_key: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let config = SignerConfig {
//!     key_id: "k1".to_string(),
//!     signing_key: SecretString::from("hunter2"),
//! };
//!
//! let key: &str = config.signing_key.expose_secret();
//! # assert_eq!(key, "hunter2");
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("signing-key-123");
        assert_eq!(secret.expose_secret(), "signing-key-123");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct TokenConfig {
            issuer: String,
            key: SecretString,
        }

        let config = TokenConfig {
            issuer: "roomcast".to_string(),
            key: SecretString::from("super-secret"),
        };

        let debug_str = format!("{config:?}");

        assert!(debug_str.contains("roomcast"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }
}
