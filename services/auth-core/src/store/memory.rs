//! In-process revocation store for tests and single-node deployments.

use super::{check_ttl, keys, RevocationStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Map size that triggers the first purge of expired entries.
const PURGE_THRESHOLD: usize = 10_000;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Entries plus the size at which the next purge runs. After each purge
/// the mark moves to twice the surviving count, so a map full of live
/// entries is not rescanned on every insert.
#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    purge_at: usize,
    floor: usize,
}

impl Entries {
    fn with_floor(floor: usize) -> Self {
        Self {
            map: HashMap::new(),
            purge_at: floor,
            floor,
        }
    }

    fn purge_if_due(&mut self, now: Instant) {
        if self.map.len() < self.purge_at {
            return;
        }
        self.map.retain(|_, e| e.is_live(now));
        self.purge_at = self.map.len().saturating_mul(2).max(self.floor);
    }
}

/// `HashMap` store with lazy expiry. Atomicity comes from the mutex, which
/// is never held across an await.
#[derive(Debug)]
pub struct MemoryRevocationStore {
    entries: Mutex<Entries>,
}

impl Default for MemoryRevocationStore {
    fn default() -> Self {
        Self::with_purge_threshold(PURGE_THRESHOLD)
    }
}

impl MemoryRevocationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_purge_threshold(threshold: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::with_floor(threshold)),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.map.values().filter(|e| e.is_live(now)).count()
    }

    /// Whether the store holds no live entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn insert(&self, key: String, value: &str, ttl: Duration, only_if_absent: bool) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.purge_if_due(now);
        if only_if_absent && entries.map.get(&key).is_some_and(|e| e.is_live(now)) {
            return false;
        }
        entries.map.insert(key, Entry::new(value, ttl));
        true
    }

    async fn live_value(&self, key: &str, remove: bool) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let live = entries.map.get(key).is_some_and(|e| e.is_live(now));
        if !live {
            entries.map.remove(key);
            return None;
        }
        if remove {
            entries.map.remove(key).map(|e| e.value)
        } else {
            entries.map.get(key).map(|e| e.value.clone())
        }
    }
}

fn used_at() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = keys::blacklist(jti);
        check_ttl(&key, ttl)?;
        self.insert(key, &used_at(), ttl, false).await;
        Ok(())
    }

    async fn blacklist_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = keys::blacklist(jti);
        check_ttl(&key, ttl)?;
        Ok(self.insert(key, &used_at(), ttl, true).await)
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(&keys::blacklist(jti), false).await.is_some())
    }

    async fn mark_used_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = keys::used_proof(jti);
        check_ttl(&key, ttl)?;
        Ok(self.insert(key, &used_at(), ttl, true).await)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        check_ttl(key, ttl)?;
        self.insert(key.to_string(), value, ttl, false).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key, false).await)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_value(key, true).await.is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key, true).await)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_blacklist() {
        let store = MemoryRevocationStore::new();
        assert!(!store.is_blacklisted("jti-1").await.unwrap());

        store.blacklist("jti-1", TTL).await.unwrap();
        assert!(store.is_blacklisted("jti-1").await.unwrap());
        assert!(!store.is_blacklisted("jti-2").await.unwrap());

        let stored = store.get("blacklist:jti-1").await.unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stored).is_ok());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryRevocationStore::new();
        store.blacklist("short", Duration::from_millis(20)).await.unwrap();
        assert!(store.is_blacklisted("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.is_blacklisted("short").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_mark_used_once() {
        let store = MemoryRevocationStore::new();
        assert!(store.mark_used_if_absent("proof-1", TTL).await.unwrap());
        assert!(!store.mark_used_if_absent("proof-1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = MemoryRevocationStore::new();
        store.put("nonce:n", "{}", TTL).await.unwrap();

        assert_eq!(store.take("nonce:n").await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.take("nonce:n").await.unwrap(), None);
        assert!(!store.delete("nonce:n").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = MemoryRevocationStore::new();
        assert!(matches!(
            store.blacklist("x", Duration::ZERO).await,
            Err(StoreError::InvalidTtl { .. })
        ));
        assert!(matches!(
            store.put("k", "v", Duration::ZERO).await,
            Err(StoreError::InvalidTtl { .. })
        ));
    }

    #[tokio::test]
    async fn test_purge_mark_moves_with_live_entries() {
        let store = MemoryRevocationStore::with_purge_threshold(4);
        for i in 0..4 {
            store.put(&format!("k{i}"), "v", TTL).await.unwrap();
        }
        // All four are live, so the purge keeps them and waits for eight.
        store.put("k4", "v", TTL).await.unwrap();
        assert_eq!(store.entries.lock().await.purge_at, 8);

        for i in 0..3 {
            store.put(&format!("short{i}"), "v", Duration::from_millis(10)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.put("k8", "v", TTL).await.unwrap();

        let entries = store.entries.lock().await;
        assert_eq!(entries.map.len(), 6);
        assert_eq!(entries.purge_at, 10);
    }

    #[tokio::test]
    async fn test_concurrent_blacklist_if_absent_has_one_winner() {
        let store = Arc::new(MemoryRevocationStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.blacklist_if_absent("contested", TTL).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
