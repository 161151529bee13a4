//! Revocation store errors.

use rust_common::{AttemptTimedOut, Retryable};
use std::time::Duration;
use thiserror::Error;

/// Revocation store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or returned an error
    #[error("revocation store unavailable: {0}")]
    Unavailable(String),

    /// An attempt ran past its deadline
    #[error("revocation store timed out after {0:?}")]
    Timeout(Duration),

    /// Stored value could not be encoded or decoded
    #[error("revocation store serialization error: {0}")]
    Serialization(String),

    /// Zero TTL requested
    #[error("invalid ttl for key {key}")]
    InvalidTtl {
        /// Key the write was for
        key: String,
    },
}

impl StoreError {
    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::Serialization(_) => "serialization",
            Self::InvalidTtl { .. } => "invalid_ttl",
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

impl From<AttemptTimedOut> for StoreError {
    fn from(err: AttemptTimedOut) -> Self {
        Self::Timeout(err.deadline())
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(format!("{:?}: {}", err.kind(), err.detail().unwrap_or("no detail")))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Unavailable("reset".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_millis(500)).is_retryable());
        assert!(!StoreError::InvalidTtl { key: "k".into() }.is_retryable());
        assert!(!StoreError::Serialization("bad".into()).is_retryable());
    }

    #[test]
    fn test_from_attempt_timeout() {
        let err = StoreError::from(AttemptTimedOut(Duration::from_millis(500)));
        assert_eq!(err, StoreError::Timeout(Duration::from_millis(500)));
    }
}
