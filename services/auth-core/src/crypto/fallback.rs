//! Reduced-security signed-token mode.
//!
//! Engaged only when the Ed25519/AES primitives fail at startup. Tokens are
//! HS256 JWTs carrying the same claims, with the purpose in the JOSE `typ`
//! header. Refresh tokens lose confidentiality in this mode.

use super::envelope::TokenPurpose;
use crate::token::TokenError;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;
use zeroize::Zeroizing;

/// HMAC-SHA-256 signer for fallback tokens.
pub struct FallbackSigner {
    secret: Zeroizing<Vec<u8>>,
    activation_count: AtomicU64,
}

impl std::fmt::Debug for FallbackSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSigner")
            .field("activation_count", &self.activation_count())
            .finish_non_exhaustive()
    }
}

impl FallbackSigner {
    /// Create a signer with an explicit secret.
    #[must_use]
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            activation_count: AtomicU64::new(0),
        }
    }

    /// Create a signer with a random 32-byte secret for this process.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut secret = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret)
    }

    /// Number of tokens signed or verified through the fallback.
    #[must_use]
    pub fn activation_count(&self) -> u64 {
        self.activation_count.load(Ordering::Relaxed)
    }

    fn record_activation(&self) {
        let count = self.activation_count.fetch_add(1, Ordering::Relaxed);
        if count == 0 {
            warn!("first token handled by the HS256 fallback signer");
        }
    }

    /// Sign a JSON payload as an HS256 JWT tagged with `purpose`.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` if the payload is not a JSON object,
    /// `TokenError::KeyUnavailable` if signing fails.
    pub fn seal(&self, purpose: TokenPurpose, payload: &[u8]) -> Result<String, TokenError> {
        self.record_activation();
        let claims: serde_json::Value = serde_json::from_slice(payload)?;
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(purpose.footer().to_string());
        encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| TokenError::KeyUnavailable(format!("fallback signing failed: {e}")))
    }

    /// Verify an HS256 JWT and return its purpose and payload.
    ///
    /// Temporal claims are not checked here; the token service applies the
    /// same window checks to every strategy.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` for an invalid signature, a foreign
    /// algorithm or a missing/unknown `typ`.
    pub fn open(&self, token: &str) -> Result<(TokenPurpose, Vec<u8>), TokenError> {
        self.record_activation();
        let header = decode_header(token).map_err(|e| TokenError::malformed(e.to_string()))?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::malformed("unexpected algorithm"));
        }
        let purpose = header
            .typ
            .as_deref()
            .and_then(|typ| TokenPurpose::from_footer(typ.as_bytes()))
            .ok_or_else(|| TokenError::malformed("missing or unknown typ"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<serde_json::Value>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(|e| TokenError::malformed(e.to_string()))?;
        Ok((purpose, serde_json::to_vec(&data.claims)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_then_open() {
        let signer = FallbackSigner::new(b"test-signing-key-for-hmac-256!!".to_vec());
        let token = signer.seal(TokenPurpose::Refresh, br#"{"jti":"abc"}"#).unwrap();

        assert_eq!(token.split('.').count(), 3);
        let (purpose, payload) = signer.open(&token).unwrap();
        assert_eq!(purpose, TokenPurpose::Refresh);
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["jti"], "abc");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let a = FallbackSigner::ephemeral();
        let b = FallbackSigner::ephemeral();
        let token = a.seal(TokenPurpose::Access, b"{}").unwrap();
        assert!(matches!(b.open(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_plain_jwt_without_purpose_rejected() {
        let secret = b"shared".to_vec();
        let signer = FallbackSigner::new(secret.clone());
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"sub": "x"}),
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();
        assert!(matches!(signer.open(&token), Err(TokenError::Malformed(_))));
    }

    #[test]
    fn test_activation_count() {
        let signer = FallbackSigner::ephemeral();
        assert_eq!(signer.activation_count(), 0);
        let token = signer.seal(TokenPurpose::Access, b"{}").unwrap();
        signer.open(&token).unwrap();
        assert_eq!(signer.activation_count(), 2);
    }
}
