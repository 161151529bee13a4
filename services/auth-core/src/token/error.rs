//! Token error types.

use super::TokenPurpose;
use crate::error::ErrorKind;
use thiserror::Error;

/// Token issuance and verification errors.
///
/// Verification reports the first failing stage: structure and signature
/// (`Malformed`), purpose (`WrongType`), then validity window
/// (`NotYetValid`, `Expired`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Structure, encoding, signature or decryption failure
    #[error("malformed token: {0}")]
    Malformed(String),

    /// `exp` is in the past
    #[error("token expired at {expired_at}")]
    Expired {
        /// Expiry as unix seconds
        expired_at: i64,
    },

    /// `nbf` is in the future
    #[error("token not valid before {valid_from}")]
    NotYetValid {
        /// Start of validity as unix seconds
        valid_from: i64,
    },

    /// Authentic token issued for another purpose
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType {
        /// Purpose the caller asked for
        expected: TokenPurpose,
        /// Purpose the token carries
        actual: TokenPurpose,
    },

    /// Requested lifetime violates the token policy
    #[error("invalid token ttl: {0}")]
    InvalidTtl(String),

    /// No usable key material for this operation
    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),
}

impl TokenError {
    /// Create a malformed-token error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_) => ErrorKind::TokenMalformed,
            Self::Expired { .. } => ErrorKind::TokenExpired,
            Self::NotYetValid { .. } => ErrorKind::TokenNotYetValid,
            Self::WrongType { .. } => ErrorKind::TokenWrongType,
            Self::InvalidTtl(_) => ErrorKind::Internal,
            Self::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Expired { .. } => "expired",
            Self::NotYetValid { .. } => "not_yet_valid",
            Self::WrongType { .. } => "wrong_type",
            Self::InvalidTtl(_) => "invalid_ttl",
            Self::KeyUnavailable(_) => "key_unavailable",
        }
    }
}

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(format!("payload: {err}"))
    }
}

impl From<base64::DecodeError> for TokenError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Malformed(format!("encoding: {err}"))
    }
}
