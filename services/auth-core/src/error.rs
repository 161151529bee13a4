//! Top-level error taxonomy for the authentication core.
//!
//! Every layer keeps its own precise error type (`TokenError`, `ProofError`,
//! `FederationError`, `StoreError`). They converge into [`AuthError`] at the
//! orchestrator boundary, where [`AuthError::kind`] feeds logs and audit
//! events and [`AuthError::public_message`] is the only text a caller sees.

use crate::dpop::ProofError;
use crate::federation::FederationError;
use crate::store::StoreError;
use crate::token::TokenError;
use thiserror::Error;

/// Stable classification of authentication failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Structure, signature or decryption check failed
    TokenMalformed,
    /// Token or proof is past its validity window
    TokenExpired,
    /// Token is not valid yet (`nbf` in the future)
    TokenNotYetValid,
    /// Token was issued for another purpose
    TokenWrongType,
    /// Token id is blacklisted
    TokenRevoked,
    /// Proof does not match the request or the presented access token
    ProofMismatch,
    /// Proof id was already used
    ProofReplayed,
    /// Nonce missing, unknown or already consumed
    NonceInvalid,
    /// OAuth state missing, expired or mismatched
    StateInvalid,
    /// OAuth provider failure or unconfigured provider
    ProviderError,
    /// Key material could not be resolved
    KeyUnavailable,
    /// Unknown principal or wrong password
    InvalidCredentials,
    /// Registration for an email that already exists
    AlreadyRegistered,
    /// Request input rejected before any credential check
    InvalidRequest,
    /// Revocation store could not answer in time
    StoreUnavailable,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable code used in logs, metrics and audit events.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::TokenMalformed => "TOKEN_MALFORMED",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenNotYetValid => "TOKEN_NOT_YET_VALID",
            Self::TokenWrongType => "TOKEN_WRONG_TYPE",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::ProofMismatch => "PROOF_MISMATCH",
            Self::ProofReplayed => "PROOF_REPLAYED",
            Self::NonceInvalid => "NONCE_INVALID",
            Self::StateInvalid => "STATE_INVALID",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::KeyUnavailable => "KEY_UNAVAILABLE",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AlreadyRegistered => "ALREADY_REGISTERED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Generic text returned for every authentication failure.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";
/// Generic text returned for every proof-of-possession failure.
pub const PROOF_INVALID: &str = "proof invalid";

/// Errors surfaced by [`AuthOrchestrator`](crate::auth::AuthOrchestrator).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthError {
    /// Token verification or issuance failed
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Proof-of-possession verification failed
    #[error(transparent)]
    Proof(#[from] ProofError),

    /// Federated login failed
    #[error(transparent)]
    Federation(#[from] FederationError),

    /// Revocation store failed under a fail-closed policy
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Token id is blacklisted
    #[error("token revoked")]
    TokenRevoked,

    /// Unknown principal or wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Email already registered
    #[error("principal already registered")]
    AlreadyRegistered,

    /// Authorization header missing or not using the DPoP scheme
    #[error("missing or malformed credentials: {0}")]
    MissingCredentials(&'static str),

    /// Request input failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Principal repository failed
    #[error("principal repository error: {0}")]
    Repository(String),

    /// Password hashing failed
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl From<crate::auth::RepositoryError> for AuthError {
    fn from(e: crate::auth::RepositoryError) -> Self {
        Self::Repository(e.0)
    }
}

impl AuthError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Token(e) => e.kind(),
            Self::Proof(e) => e.kind(),
            Self::Federation(e) => e.kind(),
            Self::Store(_) => ErrorKind::StoreUnavailable,
            Self::TokenRevoked => ErrorKind::TokenRevoked,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::AlreadyRegistered => ErrorKind::AlreadyRegistered,
            Self::MissingCredentials(_) => ErrorKind::TokenMalformed,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Repository(_) | Self::PasswordHash(_) => ErrorKind::Internal,
        }
    }

    /// The only message that may leave the process.
    ///
    /// Precise reasons stay in logs and audit events so an attacker cannot
    /// use responses as an oracle.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Proof(_) => PROOF_INVALID,
            Self::AlreadyRegistered => "registration failed",
            Self::InvalidRequest(_) => "invalid request",
            _ => AUTHENTICATION_FAILED,
        }
    }
}

/// Startup and configuration failures.
///
/// These are hard failures: the process should not start with them.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable is present but unparseable
    #[error("invalid {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Values are individually valid but violate a policy invariant
    #[error("policy violation: {0}")]
    Policy(String),

    /// Key material could not be resolved and fallback is disabled
    #[error("key material unavailable: {0}")]
    KeyUnavailable(String),

    /// OAuth HTTP client could not be built
    #[error("http client error: {0}")]
    HttpClient(String),

    /// Revocation store could not be reached at startup
    #[error("revocation store error: {0}")]
    Store(#[from] StoreError),
}

impl ConfigError {
    /// Create an invalid-variable error.
    #[must_use]
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_message_is_generic() {
        let errors = [
            AuthError::TokenRevoked,
            AuthError::InvalidCredentials,
            AuthError::Token(TokenError::malformed("bad signature")),
            AuthError::Store(StoreError::Unavailable("down".to_string())),
        ];
        for err in errors {
            assert_eq!(err.public_message(), AUTHENTICATION_FAILED);
        }
    }

    #[test]
    fn test_proof_errors_collapse_to_one_message() {
        let replayed = AuthError::Proof(ProofError::ProofReplayed);
        let binding = AuthError::Proof(ProofError::TokenBindingMismatch);

        assert_eq!(replayed.public_message(), PROOF_INVALID);
        assert_eq!(binding.public_message(), PROOF_INVALID);
        assert_eq!(replayed.kind(), ErrorKind::ProofReplayed);
        assert_eq!(binding.kind(), ErrorKind::ProofMismatch);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorKind::TokenWrongType.code(), "TOKEN_WRONG_TYPE");
        assert_eq!(ErrorKind::NonceInvalid.to_string(), "NONCE_INVALID");
    }
}
