//! Room Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bounded wait for an outbound request, in milliseconds.
///
/// Applies to every signaling request to a client connection and every
/// control RPC to a media-processing node. A timeout is treated identically
/// to a transport failure.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default RC instance ID prefix.
pub const DEFAULT_RC_ID_PREFIX: &str = "rc";

/// Room Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Signing key for peer session-resumption tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub peer_token_secret: SecretString,

    /// Bounded wait for outbound requests in milliseconds
    /// (default: 10000).
    pub request_timeout_ms: u64,

    /// Unique identifier for this RC instance.
    pub rc_id: String,

    /// Deployment region identifier (e.g., "us-east-1").
    pub region: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("peer_token_secret", &"[REDACTED]")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("rc_id", &self.rc_id)
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when `RC_PEER_TOKEN_SECRET` is
    /// absent, [`ConfigError::InvalidValue`] for unparseable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let peer_token_secret = SecretString::from(
            vars.get("RC_PEER_TOKEN_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("RC_PEER_TOKEN_SECRET".to_string()))?
                .clone(),
        );

        let request_timeout_ms = match vars.get("RC_REQUEST_TIMEOUT_MS") {
            Some(raw) => raw.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("RC_REQUEST_TIMEOUT_MS: {raw}"))
            })?,
            None => DEFAULT_REQUEST_TIMEOUT_MS,
        };

        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_REQUEST_TIMEOUT_MS must be positive".to_string(),
            ));
        }

        let region = vars
            .get("RC_REGION")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        // Generate RC instance ID
        let rc_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            peer_token_secret,
            request_timeout_ms,
            rc_id,
            region,
        })
    }

    /// The bounded wait for outbound requests as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "RC_PEER_TOKEN_SECRET".to_string(),
            "test-signing-key-1234567890".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = base_vars();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(
            config.peer_token_secret.expose_secret(),
            "test-signing-key-1234567890"
        );
        assert_eq!(config.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT_MS);
        assert_eq!(config.region, "us-east-1");
        // RC ID should be auto-generated
        assert!(config.rc_id.starts_with("rc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("RC_REQUEST_TIMEOUT_MS".to_string(), "2500".to_string());
        vars.insert("RC_REGION".to_string(), "eu-west-1".to_string());
        vars.insert("RC_ID".to_string(), "rc-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.request_timeout_ms, 2500);
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.rc_id, "rc-custom-001");
    }

    #[test]
    fn test_from_vars_missing_peer_token_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnvVar(v)) if v == "RC_PEER_TOKEN_SECRET"
        ));
    }

    #[test]
    fn test_from_vars_rejects_unparseable_timeout() {
        let mut vars = base_vars();
        vars.insert("RC_REQUEST_TIMEOUT_MS".to_string(), "soon".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_rejects_zero_timeout() {
        let mut vars = base_vars();
        vars.insert("RC_REQUEST_TIMEOUT_MS".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("test-signing-key"));
    }
}
