//! Peer session-resumption tokens.
//!
//! A peer receives a signed token on every attach. Presenting that token on a
//! later connection resumes the same peer identity instead of minting a new
//! one. Tokens carry only the peer id; they are not access tokens and grant
//! no permissions by themselves.
//!
//! Tokens are HS256 JWTs with no timestamp claims: a resumption token stays
//! valid for as long as the signing key does, matching the lifetime of the
//! controller process that minted it.

use crate::secret::{ExposeSecret, SecretString};
use crate::types::PeerId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when minting or verifying a resumption token.
///
/// Verification failures are intentionally collapsed into a single variant so
/// callers cannot distinguish a forged token from a stale one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token could not be minted.
    #[error("Failed to sign token")]
    Signing,

    /// Token is invalid, malformed, or signed with a different key.
    #[error("Invalid token")]
    Invalid,
}

/// Claims carried by a resumption token.
#[derive(Debug, Serialize, Deserialize)]
struct ResumptionClaims {
    /// The peer id this token resumes.
    id: PeerId,
}

/// Mints and verifies peer session-resumption tokens.
///
/// Constructed once from configuration and passed to the components that need
/// it; there is no process-wide signing state.
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenSigner {
    /// Create a signer from the configured signing key.
    #[must_use]
    pub fn new(signing_key: &SecretString) -> Self {
        let secret = signing_key.expose_secret().as_bytes();

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Mint a resumption token for the given peer.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if serialization of the claims fails.
    pub fn sign(&self, peer_id: PeerId) -> Result<String, TokenError> {
        encode(
            &Header::default(),
            &ResumptionClaims { id: peer_id },
            &self.encoding_key,
        )
        .map_err(|_| TokenError::Signing)
    }

    /// Verify a presented token, returning the peer id it resumes.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Invalid`] for any malformed, forged, or
    /// wrong-key token.
    pub fn verify(&self, token: &str) -> Result<PeerId, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Resumption tokens carry no exp/iat claims.
        validation.required_spec_claims.clear();
        validation.validate_exp = false;

        decode::<ResumptionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims.id)
            .map_err(|_| TokenError::Invalid)
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(&SecretString::from("test-signing-key-1234567890"))
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let signer = signer();
        let peer_id = PeerId::new();

        let token = signer.sign(peer_id).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), peer_id);
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let signer = signer();

        assert_eq!(signer.verify("not-a-token"), Err(TokenError::Invalid));
        assert_eq!(signer.verify(""), Err(TokenError::Invalid));
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let peer_id = PeerId::new();
        let token = signer().sign(peer_id).unwrap();

        let other = TokenSigner::new(&SecretString::from("a-different-signing-key"));
        assert_eq!(other.verify(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let debug = format!("{:?}", signer());
        assert!(!debug.contains("test-signing-key"));
    }
}
