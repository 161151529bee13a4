//! Token issuance and verification.

use super::claims::{AccessTokenClaims, RefreshTokenClaims, TokenIdentity, TokenKind, TokenSubject, TypedClaims};
use super::{TokenError, TokenPurpose};
use crate::config::TokenPolicy;
use crate::crypto::KeyStrategy;
use crate::dpop::ProofClaims;
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Access and refresh token issued together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedPair {
    /// Signed access token
    pub access_token: String,
    /// Encrypted refresh token
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Claims common to every token, read before the typed claims are trusted.
#[derive(Deserialize)]
struct TokenHeaderClaims {
    jti: String,
    exp: i64,
    token_type: TokenKind,
}

/// Issues and verifies versioned tokens with the resolved key strategy.
#[derive(Debug)]
pub struct TokenService {
    keys: Arc<KeyStrategy>,
    policy: TokenPolicy,
}

impl TokenService {
    /// Create a token service.
    #[must_use]
    pub fn new(keys: Arc<KeyStrategy>, policy: TokenPolicy) -> Self {
        Self { keys, policy }
    }

    /// Token lifetimes in force.
    #[must_use]
    pub const fn policy(&self) -> &TokenPolicy {
        &self.policy
    }

    /// Issue an access token. TTLs above the policy maximum are clamped.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::InvalidTtl` for a zero TTL.
    #[instrument(skip(self, subject), fields(user_id = %subject.user_id))]
    pub fn create_access_token(&self, subject: &TokenSubject, ttl: Duration) -> Result<String, TokenError> {
        let ttl = self.access_ttl(ttl)?;
        self.issue::<AccessTokenClaims>(subject, ttl, now())
    }

    /// Issue a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::InvalidTtl` for a zero TTL or one that does not
    /// outlive every access token.
    #[instrument(skip(self, subject), fields(user_id = %subject.user_id))]
    pub fn create_refresh_token(&self, subject: &TokenSubject, ttl: Duration) -> Result<String, TokenError> {
        let ttl = self.refresh_ttl(ttl)?;
        self.issue::<RefreshTokenClaims>(subject, ttl, now())
    }

    /// Issue an access/refresh pair with the policy lifetimes.
    ///
    /// # Errors
    ///
    /// Propagates issuance errors.
    pub fn issue_pair(&self, subject: &TokenSubject) -> Result<IssuedPair, TokenError> {
        let access_ttl = self.access_ttl(self.policy.access_ttl)?;
        Ok(IssuedPair {
            access_token: self.create_access_token(subject, access_ttl)?,
            refresh_token: self.create_refresh_token(subject, self.policy.refresh_ttl)?,
            expires_in: access_ttl.as_secs(),
        })
    }

    /// Verify an access token and return its claims.
    ///
    /// # Errors
    ///
    /// `Malformed`, `WrongType`, `NotYetValid` or `Expired`, in that order.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        self.verify_at(token, now())
    }

    /// Verify a refresh token and return its claims.
    ///
    /// # Errors
    ///
    /// `Malformed`, `WrongType`, `NotYetValid` or `Expired`, in that order.
    pub fn verify_refresh_token(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        self.verify_at(token, now())
    }

    /// Authenticate and type-check a token without its validity window.
    ///
    /// Used for revocation bookkeeping: an expired token still yields its id.
    ///
    /// # Errors
    ///
    /// `Malformed` or `WrongType`.
    pub fn inspect(&self, token: &str, kind: TokenKind) -> Result<TokenIdentity, TokenError> {
        let payload = self.open_purpose(token, kind.purpose())?;
        let claims: TokenHeaderClaims = serde_json::from_slice(&payload)?;
        if claims.token_type != kind {
            return Err(TokenError::WrongType {
                expected: kind.purpose(),
                actual: claims.token_type.purpose(),
            });
        }
        Ok(TokenIdentity {
            jti: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Token id of an authentic token of `kind`, expired or not.
    ///
    /// # Errors
    ///
    /// `Malformed` or `WrongType`.
    pub fn get_token_id(&self, token: &str, kind: TokenKind) -> Result<String, TokenError> {
        self.inspect(token, kind).map(|identity| identity.jti)
    }

    /// Sign proof claims as a `dpop_token` envelope.
    ///
    /// # Errors
    ///
    /// Propagates key strategy errors.
    pub fn seal_proof(&self, claims: &ProofClaims) -> Result<String, TokenError> {
        self.seal(TokenPurpose::Proof, claims)
    }

    /// Authenticate a proof envelope and return its claims.
    ///
    /// The proof window is checked by the caller against `iat`.
    ///
    /// # Errors
    ///
    /// `Malformed` or `WrongType`.
    pub fn open_proof(&self, proof: &str) -> Result<ProofClaims, TokenError> {
        let payload = self.open_purpose(proof, TokenPurpose::Proof)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    pub(crate) fn verify_at<C: TypedClaims>(&self, token: &str, now: i64) -> Result<C, TokenError> {
        let result = self.decode::<C>(token).and_then(|claims| {
            if claims.not_before() > now {
                return Err(TokenError::NotYetValid {
                    valid_from: claims.not_before(),
                });
            }
            if now > claims.expires_at() {
                return Err(TokenError::Expired {
                    expired_at: claims.expires_at(),
                });
            }
            Ok(claims)
        });

        match &result {
            Ok(_) => metrics::record_token_verification(C::KIND.as_str(), "valid"),
            Err(e) => {
                debug!(token_type = C::KIND.as_str(), reason = e.label(), "token rejected");
                metrics::record_token_verification(C::KIND.as_str(), e.label());
            }
        }
        result
    }

    pub(crate) fn issue<C: TypedClaims>(
        &self,
        subject: &TokenSubject,
        ttl: Duration,
        issued_at: i64,
    ) -> Result<String, TokenError> {
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| TokenError::InvalidTtl("ttl out of range".to_string()))?;
        let claims = C::issue(subject, issued_at, ttl_secs);
        let token = self.seal(C::KIND.purpose(), &claims)?;
        metrics::record_token_issued(C::KIND.as_str(), self.keys.name());
        debug!(token_type = C::KIND.as_str(), jti = claims.jti(), "token issued");
        Ok(token)
    }

    fn decode<C: TypedClaims>(&self, token: &str) -> Result<C, TokenError> {
        let payload = self.open_purpose(token, C::KIND.purpose())?;
        let claims: C = serde_json::from_slice(&payload)?;
        if claims.token_type() != C::KIND {
            return Err(TokenError::WrongType {
                expected: C::KIND.purpose(),
                actual: claims.token_type().purpose(),
            });
        }
        Ok(claims)
    }

    fn open_purpose(&self, token: &str, expected: TokenPurpose) -> Result<Vec<u8>, TokenError> {
        let (actual, payload) = self.keys.open(token.trim())?;
        if actual != expected {
            return Err(TokenError::WrongType { expected, actual });
        }
        Ok(payload)
    }

    fn seal<T: Serialize>(&self, purpose: TokenPurpose, claims: &T) -> Result<String, TokenError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| TokenError::KeyUnavailable(format!("claims serialization failed: {e}")))?;
        self.keys.seal(purpose, &payload)
    }

    fn access_ttl(&self, requested: Duration) -> Result<Duration, TokenError> {
        if requested.as_secs() == 0 {
            return Err(TokenError::InvalidTtl("access token ttl must be at least one second".to_string()));
        }
        if requested > self.policy.access_max_ttl {
            warn!(
                requested_secs = requested.as_secs(),
                max_secs = self.policy.access_max_ttl.as_secs(),
                "access token ttl clamped to policy maximum"
            );
            return Ok(self.policy.access_max_ttl);
        }
        Ok(requested)
    }

    fn refresh_ttl(&self, requested: Duration) -> Result<Duration, TokenError> {
        if requested.as_secs() == 0 {
            return Err(TokenError::InvalidTtl("refresh token ttl must be at least one second".to_string()));
        }
        if requested <= self.policy.access_max_ttl {
            return Err(TokenError::InvalidTtl(format!(
                "refresh token ttl ({}s) must exceed the access token maximum ({}s)",
                requested.as_secs(),
                self.policy.access_max_ttl.as_secs()
            )));
        }
        Ok(requested)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
