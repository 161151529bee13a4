//! Proof-of-possession service.
//!
//! Creates proofs, verifies them against the request and the presented
//! access token, and issues single-use nonces. Replay prevention goes
//! through the revocation registry so it holds across instances.

use super::proof::{compute_ath, NonceChallenge, ProofClaims, ProofError, VerifiedProof};
use crate::metrics;
use crate::store::RevocationRegistry;
use crate::token::TokenService;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument, warn};

/// Proof-of-possession service.
#[derive(Debug, Clone)]
pub struct ProofOfPossessionService {
    tokens: Arc<TokenService>,
    registry: Arc<RevocationRegistry>,
    max_age: Duration,
    nonce_ttl: Duration,
}

impl ProofOfPossessionService {
    /// Create the service with the token policy's proof window and nonce TTL.
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, registry: Arc<RevocationRegistry>) -> Self {
        let policy = tokens.policy();
        let (max_age, nonce_ttl) = (policy.proof_max_age, policy.nonce_ttl);
        Self {
            tokens,
            registry,
            max_age,
            nonce_ttl,
        }
    }

    /// Create a proof binding `method` and `uri` to `access_token`.
    ///
    /// # Errors
    ///
    /// Propagates envelope signing errors.
    pub fn create_proof(
        &self,
        method: &str,
        uri: &str,
        access_token: &str,
        nonce: Option<&str>,
    ) -> Result<String, ProofError> {
        let claims = ProofClaims::new(method, uri, access_token, nonce.map(str::to_string));
        Ok(self.tokens.seal_proof(&claims)?)
    }

    /// Verify a proof for one request.
    ///
    /// Checks run in a fixed order: envelope, method and URI, access token
    /// binding, window, replay, nonce. The proof id is recorded before the
    /// nonce is consumed, so a proof failing its nonce check is burned.
    ///
    /// # Errors
    ///
    /// The first failing check as a `ProofError`.
    #[instrument(skip_all, fields(method = %method, uri = %uri))]
    pub async fn verify_proof(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: &str,
        max_age: Option<Duration>,
        nonce: Option<&str>,
    ) -> Result<VerifiedProof, ProofError> {
        let max_age = max_age.unwrap_or(self.max_age);
        let result = self
            .check(proof, method, uri, access_token, max_age, nonce, chrono::Utc::now().timestamp())
            .await;

        match &result {
            Ok(_) => metrics::record_proof_validation("valid"),
            Err(e) => {
                if matches!(e, ProofError::ProofReplayed) {
                    warn!("proof replay detected");
                    metrics::record_security_event("PROOF_REPLAY");
                } else {
                    debug!(reason = e.label(), "proof rejected");
                }
                metrics::record_proof_validation(e.label());
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn check(
        &self,
        proof: &str,
        method: &str,
        uri: &str,
        access_token: &str,
        max_age: Duration,
        nonce: Option<&str>,
        now: i64,
    ) -> Result<VerifiedProof, ProofError> {
        let claims = self.tokens.open_proof(proof)?;

        if claims.htm != method {
            return Err(ProofError::MethodMismatch {
                expected: method.to_string(),
                actual: claims.htm,
            });
        }
        if claims.htu != uri {
            return Err(ProofError::UriMismatch {
                expected: uri.to_string(),
                actual: claims.htu,
            });
        }

        let expected_ath = compute_ath(access_token);
        if !bool::from(claims.ath.as_bytes().ct_eq(expected_ath.as_bytes())) {
            return Err(ProofError::TokenBindingMismatch);
        }

        let age_secs = now.saturating_sub(claims.iat);
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        if age_secs.saturating_abs() > max_age_secs {
            return Err(ProofError::ProofExpired { age_secs });
        }

        if !self.registry.claim_proof(&claims.jti, replay_ttl(claims.iat, now, max_age)).await? {
            return Err(ProofError::ProofReplayed);
        }

        let consumed = match nonce.or(claims.nonce.as_deref()) {
            Some(expected) => {
                let carried = claims.nonce.as_deref().ok_or(ProofError::InvalidNonce)?;
                if !bool::from(carried.as_bytes().ct_eq(expected.as_bytes())) {
                    return Err(ProofError::InvalidNonce);
                }
                if self.registry.take_nonce(expected).await?.is_none() {
                    return Err(ProofError::InvalidNonce);
                }
                Some(expected.to_string())
            }
            None => None,
        };

        Ok(VerifiedProof {
            jti: claims.jti,
            iat: claims.iat,
            nonce: consumed,
        })
    }

    /// Issue a single-use nonce for a client to embed in its next proof.
    ///
    /// # Errors
    ///
    /// Returns `ProofError::Store` if the nonce cannot be recorded.
    pub async fn generate_nonce(&self, client_id: Option<&str>) -> Result<String, ProofError> {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = URL_SAFE_NO_PAD.encode(bytes);

        let challenge = NonceChallenge {
            client_id: client_id.map(str::to_string),
            created_at: chrono::Utc::now(),
        };
        let value = serde_json::to_string(&challenge)
            .map_err(|e| ProofError::Store(crate::store::StoreError::from(e)))?;
        self.registry.put_nonce(&nonce, &value, self.nonce_ttl).await?;
        debug!(client_id = ?client_id, "nonce issued");
        Ok(nonce)
    }
}

/// How long a proof id must stay recorded: until the proof leaves its
/// acceptance window, plus one more window. Never less than twice `max_age`.
fn replay_ttl(iat: i64, now: i64, max_age: Duration) -> Duration {
    let remaining = u64::try_from(iat.saturating_sub(now)).unwrap_or(0);
    let window = max_age.saturating_add(Duration::from_secs(remaining));
    window.saturating_add(max_age).max(max_age.saturating_mul(2))
}
