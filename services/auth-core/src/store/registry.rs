//! Failure policy over a revocation store.
//!
//! Blacklist checks and writes go through the registry, which decides what a
//! store outage means for the request. Single-use values (nonces, OAuth
//! states) always fail closed: accepting one that cannot be consumed would
//! turn an outage into a replay window.

use super::{keys, RevocationStore, StoreError};
use crate::config::RevocationFailurePolicy;
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Revocation store plus the deployment's failure policy.
#[derive(Clone)]
pub struct RevocationRegistry {
    store: Arc<dyn RevocationStore>,
    policy: RevocationFailurePolicy,
}

impl std::fmt::Debug for RevocationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationRegistry")
            .field("backend", &self.store.backend())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RevocationRegistry {
    /// Create a registry.
    #[must_use]
    pub fn new(store: Arc<dyn RevocationStore>, policy: RevocationFailurePolicy) -> Self {
        Self { store, policy }
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RevocationStore> {
        &self.store
    }

    /// Failure policy in force.
    #[must_use]
    pub const fn policy(&self) -> RevocationFailurePolicy {
        self.policy
    }

    /// Whether a token id is blacklisted.
    ///
    /// # Errors
    ///
    /// Returns the store error under `FailClosed`.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        match self.store.is_blacklisted(jti).await {
            Ok(revoked) => Ok(revoked),
            Err(e) => self.degrade("is_blacklisted", e, false),
        }
    }

    /// Blacklist a token id for `ttl`. Returns `false` when the entry was
    /// not written because the store is down and the policy fails open.
    ///
    /// # Errors
    ///
    /// Returns the store error under `FailClosed`, and always for an
    /// invalid TTL.
    pub async fn revoke(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.store.blacklist(jti, ttl).await {
            Ok(()) => {
                metrics::record_revocation_operation("revoke", "success");
                Ok(true)
            }
            Err(e) => self.degrade("blacklist", e, false),
        }
    }

    /// Blacklist a token id unless another caller already did. Returns
    /// `true` if this caller won.
    ///
    /// # Errors
    ///
    /// Returns the store error under `FailClosed`.
    pub async fn revoke_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.store.blacklist_if_absent(jti, ttl).await {
            Ok(won) => Ok(won),
            Err(e) => self.degrade("blacklist_if_absent", e, true),
        }
    }

    /// Record a proof id. Returns `false` on replay.
    ///
    /// # Errors
    ///
    /// Returns the store error under `FailClosed`.
    pub async fn claim_proof(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        match self.store.mark_used_if_absent(jti, ttl).await {
            Ok(first) => Ok(first),
            Err(e) => self.degrade("mark_used_if_absent", e, true),
        }
    }

    /// Store a single-use nonce.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn put_nonce(&self, nonce: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store.put(&keys::nonce(nonce), value, ttl).await
    }

    /// Consume a nonce.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn take_nonce(&self, nonce: &str) -> Result<Option<String>, StoreError> {
        self.store.take(&keys::nonce(nonce)).await
    }

    /// Store a single-use OAuth state.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn put_state(&self, state: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store.put(&keys::oauth_state(state), value, ttl).await
    }

    /// Consume an OAuth state.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn take_state(&self, state: &str) -> Result<Option<String>, StoreError> {
        self.store.take(&keys::oauth_state(state)).await
    }

    fn degrade<T>(&self, operation: &'static str, error: StoreError, permissive: T) -> Result<T, StoreError> {
        if matches!(error, StoreError::InvalidTtl { .. }) {
            return Err(error);
        }
        match self.policy {
            RevocationFailurePolicy::FailClosed => {
                warn!(operation, error = %error, "revocation store unavailable; failing closed");
                Err(error)
            }
            RevocationFailurePolicy::FailOpen => {
                warn!(operation, error = %error, "revocation store unavailable; failing open");
                metrics::record_revocation_degraded(operation);
                Ok(permissive)
            }
        }
    }
}
