//! Revocation store: blacklisted token ids, used proof ids, single-use
//! nonces and OAuth states, all with a TTL.
//!
//! Callers compute TTLs from the remaining lifetime of what they store, so
//! entries disappear once they can no longer matter.

mod error;
pub mod memory;
pub mod redis;
pub mod registry;

pub use error::StoreError;
pub use memory::MemoryRevocationStore;
pub use registry::RevocationRegistry;
pub use self::redis::RedisRevocationStore;

use crate::config::{RevocationBackend, StoreConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Key prefixes for each kind of entry.
pub mod keys {
    /// Blacklisted token id.
    #[must_use]
    pub fn blacklist(jti: &str) -> String {
        format!("blacklist:{jti}")
    }

    /// Proof id already seen.
    #[must_use]
    pub fn used_proof(jti: &str) -> String {
        format!("dpop_jti:{jti}")
    }

    /// Outstanding nonce.
    #[must_use]
    pub fn nonce(value: &str) -> String {
        format!("nonce:{value}")
    }

    /// Outstanding OAuth state.
    #[must_use]
    pub fn oauth_state(state: &str) -> String {
        format!("oauth_state:{state}")
    }
}

/// TTL-aware key/value registry backing revocation and single-use values.
///
/// Implementations must make `mark_used_if_absent`, `blacklist_if_absent`
/// and `take` atomic with respect to concurrent callers.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Blacklist a token id until `ttl` elapses.
    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Blacklist a token id unless it already is. Returns `true` if this
    /// call created the entry.
    async fn blacklist_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Whether a token id is blacklisted.
    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError>;

    /// Record a proof id. Returns `true` on first sight, `false` on replay.
    async fn mark_used_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Store a value under a full key.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read a live value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remove a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically read and remove a value.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Check that the backend answers.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Reject TTLs that would create an immortal or instantly dead entry.
pub(crate) fn check_ttl(key: &str, ttl: Duration) -> Result<(), StoreError> {
    if ttl.as_millis() == 0 {
        return Err(StoreError::InvalidTtl { key: key.to_string() });
    }
    Ok(())
}

/// Build the configured revocation store.
///
/// # Errors
///
/// Returns `StoreError::Unavailable` if Redis cannot be reached.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn RevocationStore>, StoreError> {
    match config.backend {
        RevocationBackend::Memory => Ok(Arc::new(MemoryRevocationStore::new())),
        RevocationBackend::Redis => Ok(Arc::new(RedisRevocationStore::connect(config).await?)),
    }
}
