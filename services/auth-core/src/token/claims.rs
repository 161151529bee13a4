//! Typed claims for access and refresh tokens.

use super::TokenPurpose;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token kinds a principal can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived bearer of identity
    Access,
    /// Long-lived, single-use renewal credential
    Refresh,
}

impl TokenKind {
    /// Envelope purpose for this kind.
    #[must_use]
    pub const fn purpose(self) -> TokenPurpose {
        match self {
            Self::Access => TokenPurpose::Access,
            Self::Refresh => TokenPurpose::Refresh,
        }
    }

    /// Claim value of `token_type`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "refresh" => Ok(Self::Refresh),
            other => Err(format!("unknown token kind '{other}'")),
        }
    }
}

/// Identity carried into every issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    /// Subject (the principal's email)
    pub sub: String,
    /// Principal id
    pub user_id: String,
    /// Role
    pub role: String,
}

impl TokenSubject {
    /// Create a subject.
    #[must_use]
    pub fn new(sub: impl Into<String>, user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            user_id: user_id.into(),
            role: role.into(),
        }
    }
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject
    pub sub: String,
    /// Principal id
    pub user_id: String,
    /// Role
    pub role: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
    /// Always `access`
    pub token_type: TokenKind,
}

/// Refresh token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    /// Subject
    pub sub: String,
    /// Principal id
    pub user_id: String,
    /// Role
    pub role: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Unique token id
    pub jti: String,
    /// Always `refresh`
    pub token_type: TokenKind,
}

/// Common view over the typed claims so the token service can issue and
/// validate both kinds through one code path.
pub trait TypedClaims: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Kind this claims type belongs to.
    const KIND: TokenKind;

    /// Fresh claims with a new `jti`, valid from `issued_at` for `ttl_secs`.
    fn issue(subject: &TokenSubject, issued_at: i64, ttl_secs: i64) -> Self;

    /// Token id.
    fn jti(&self) -> &str;

    /// `token_type` claim.
    fn token_type(&self) -> TokenKind;

    /// Not-before, unix seconds.
    fn not_before(&self) -> i64;

    /// Expiry, unix seconds.
    fn expires_at(&self) -> i64;

    /// Identity the token was issued for.
    fn subject(&self) -> TokenSubject;

    /// Lifetime left at `now`, `None` once expired.
    fn remaining_lifetime(&self, now: i64) -> Option<Duration> {
        remaining_lifetime(self.expires_at(), now)
    }
}

/// Lifetime left between `now` and `expires_at`, `None` once expired.
#[must_use]
pub fn remaining_lifetime(expires_at: i64, now: i64) -> Option<Duration> {
    u64::try_from(expires_at.saturating_sub(now))
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

impl TypedClaims for AccessTokenClaims {
    const KIND: TokenKind = TokenKind::Access;

    fn issue(subject: &TokenSubject, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            sub: subject.sub.clone(),
            user_id: subject.user_id.clone(),
            role: subject.role.clone(),
            iat: issued_at,
            nbf: issued_at,
            exp: issued_at.saturating_add(ttl_secs),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: Self::KIND,
        }
    }

    fn jti(&self) -> &str {
        &self.jti
    }

    fn token_type(&self) -> TokenKind {
        self.token_type
    }

    fn not_before(&self) -> i64 {
        self.nbf
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }

    fn subject(&self) -> TokenSubject {
        TokenSubject::new(&self.sub, &self.user_id, &self.role)
    }
}

impl TypedClaims for RefreshTokenClaims {
    const KIND: TokenKind = TokenKind::Refresh;

    fn issue(subject: &TokenSubject, issued_at: i64, ttl_secs: i64) -> Self {
        Self {
            sub: subject.sub.clone(),
            user_id: subject.user_id.clone(),
            role: subject.role.clone(),
            iat: issued_at,
            nbf: issued_at,
            exp: issued_at.saturating_add(ttl_secs),
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: Self::KIND,
        }
    }

    fn jti(&self) -> &str {
        &self.jti
    }

    fn token_type(&self) -> TokenKind {
        self.token_type
    }

    fn not_before(&self) -> i64 {
        self.nbf
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }

    fn subject(&self) -> TokenSubject {
        TokenSubject::new(&self.sub, &self.user_id, &self.role)
    }
}

/// Authenticated, type-checked identity of a token, independent of its
/// validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    /// Token id
    pub jti: String,
    /// Expiry, unix seconds
    pub expires_at: i64,
}

impl TokenIdentity {
    /// Lifetime left at `now`, `None` once expired.
    #[must_use]
    pub fn remaining_lifetime(&self, now: i64) -> Option<Duration> {
        remaining_lifetime(self.expires_at, now)
    }
}
