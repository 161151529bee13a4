//! Redis-backed revocation store.

use super::{check_ttl, keys, RevocationStore, StoreError};
use crate::config::StoreConfig;
use crate::metrics;
use ::redis::aio::ConnectionManager;
use ::redis::{Cmd, FromRedisValue};
use async_trait::async_trait;
use rust_common::{RetryConfig, RetryPolicy};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, info};

/// Revocation store on a shared Redis instance.
///
/// Every command runs under the retry policy: one attempt bounded by the
/// configured deadline, one retry after a short backoff, then
/// `StoreError::Unavailable` or `StoreError::Timeout`.
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
    namespace: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RedisRevocationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRevocationStore")
            .field("namespace", &self.namespace)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RedisRevocationStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` for an invalid URL or when the
    /// initial connection fails, `StoreError::Timeout` if it does not
    /// complete in time.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(config.redis_url.expose_secret())?;
        let connect_deadline = config.op_timeout.saturating_mul(4);
        let conn = tokio::time::timeout(connect_deadline, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_deadline))??;

        let retry = RetryPolicy::new(
            RetryConfig::default()
                .with_max_retries(1)
                .with_initial_delay(config.retry_backoff)
                .with_attempt_timeout(config.op_timeout),
        );

        info!(namespace = %config.namespace, "connected to redis revocation store");
        Ok(Self {
            conn,
            namespace: config.namespace.clone(),
            retry,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.namespace)
    }

    async fn run<T>(&self, operation: &'static str, cmd: Cmd) -> Result<T, StoreError>
    where
        T: FromRedisValue + Send,
    {
        let result: Result<T, StoreError> = self
            .retry
            .execute(|| {
                let mut conn = self.conn.clone();
                let cmd = cmd.clone();
                async move {
                    let value: T = cmd.query_async(&mut conn).await?;
                    Ok(value)
                }
            })
            .await;

        match &result {
            Ok(_) => metrics::record_revocation_operation(operation, "success"),
            Err(e) => {
                debug!(operation, error = %e, "redis operation failed");
                metrics::record_revocation_operation(operation, e.label());
            }
        }
        result
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration, only_if_absent: bool) -> Result<bool, StoreError> {
        check_ttl(key, ttl)?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let mut cmd = ::redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value).arg("PX").arg(ttl_ms);
        if only_if_absent {
            cmd.arg("NX");
        }
        let reply: Option<String> = self.run(if only_if_absent { "set_nx" } else { "set" }, cmd).await?;
        Ok(reply.is_some())
    }
}

fn used_at() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn blacklist(&self, jti: &str, ttl: Duration) -> Result<(), StoreError> {
        self.set(&keys::blacklist(jti), &used_at(), ttl, false).await.map(|_| ())
    }

    async fn blacklist_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.set(&keys::blacklist(jti), &used_at(), ttl, true).await
    }

    async fn is_blacklisted(&self, jti: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("EXISTS");
        cmd.arg(self.key(&keys::blacklist(jti)));
        let count: i64 = self.run("exists", cmd).await?;
        Ok(count > 0)
    }

    async fn mark_used_if_absent(&self, jti: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.set(&keys::used_proof(jti), &used_at(), ttl, true).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.set(key, value, ttl, false).await.map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = ::redis::cmd("GET");
        cmd.arg(self.key(key));
        self.run("get", cmd).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("DEL");
        cmd.arg(self.key(key));
        let removed: i64 = self.run("del", cmd).await?;
        Ok(removed > 0)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut cmd = ::redis::cmd("GETDEL");
        cmd.arg(self.key(key));
        self.run("getdel", cmd).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let pong: String = self.run("ping", ::redis::cmd("PING")).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
