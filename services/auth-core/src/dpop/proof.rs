//! Proof-of-possession claims and errors.
//!
//! A proof is a signed `dpop_token` envelope binding one HTTP request
//! (`htm`, `htu`) to one access token (`ath`).

use crate::error::ErrorKind;
use crate::store::StoreError;
use crate::token::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Proof claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    /// HTTP method of the bound request
    pub htm: String,
    /// HTTP URI of the bound request
    pub htu: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Unique proof id
    pub jti: String,
    /// `base64url(SHA-256(access_token))`
    pub ath: String,
    /// Server-issued nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl ProofClaims {
    /// Claims for a request issued now.
    #[must_use]
    pub fn new(method: &str, uri: &str, access_token: &str, nonce: Option<String>) -> Self {
        Self {
            htm: method.to_string(),
            htu: uri.to_string(),
            iat: Utc::now().timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            ath: compute_ath(access_token),
            nonce,
        }
    }
}

/// Access token hash carried in `ath`.
#[must_use]
pub fn compute_ath(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// Value stored under `nonce:<value>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceChallenge {
    /// Client the nonce was issued to
    pub client_id: Option<String>,
    /// Issue time
    pub created_at: DateTime<Utc>,
}

/// Successfully verified proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedProof {
    /// Proof id, now recorded as used
    pub jti: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Nonce consumed by this proof
    pub nonce: Option<String>,
}

/// Proof verification errors.
///
/// Kinds stay distinct here for logs and metrics; callers only ever see
/// "proof invalid".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// Envelope failed authentication or is not a proof
    #[error("proof envelope rejected: {0}")]
    Envelope(#[from] TokenError),

    /// `htm` differs from the request method
    #[error("method mismatch: expected {expected}, got {actual}")]
    MethodMismatch {
        /// Request method
        expected: String,
        /// Method in the proof
        actual: String,
    },

    /// `htu` differs from the request URI
    #[error("uri mismatch: expected {expected}, got {actual}")]
    UriMismatch {
        /// Request URI
        expected: String,
        /// URI in the proof
        actual: String,
    },

    /// `ath` does not match the presented access token
    #[error("proof is bound to a different access token")]
    TokenBindingMismatch,

    /// `iat` outside the accepted window
    #[error("proof issued {age_secs}s from now, outside the accepted window")]
    ProofExpired {
        /// Signed distance between now and `iat`
        age_secs: i64,
    },

    /// Proof id already used
    #[error("proof already used")]
    ProofReplayed,

    /// Nonce missing, unknown, already consumed or not the proof's nonce
    #[error("nonce invalid")]
    InvalidNonce,

    /// Replay or nonce registry unavailable
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProofError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Envelope(e) => e.kind(),
            Self::MethodMismatch { .. } | Self::UriMismatch { .. } | Self::TokenBindingMismatch => {
                ErrorKind::ProofMismatch
            }
            Self::ProofExpired { .. } => ErrorKind::TokenExpired,
            Self::ProofReplayed => ErrorKind::ProofReplayed,
            Self::InvalidNonce => ErrorKind::NonceInvalid,
            Self::Store(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Envelope(_) => "envelope",
            Self::MethodMismatch { .. } => "method_mismatch",
            Self::UriMismatch { .. } => "uri_mismatch",
            Self::TokenBindingMismatch => "token_binding_mismatch",
            Self::ProofExpired { .. } => "expired",
            Self::ProofReplayed => "replayed",
            Self::InvalidNonce => "invalid_nonce",
            Self::Store(_) => "store_unavailable",
        }
    }
}
