//! OAuth authorization-code federation with external identity providers.

pub mod providers;
mod service;

pub use providers::{builtin, FieldMapping, ProviderSpec, BUILTIN_PROVIDERS};
pub use service::IdentityFederationService;

use crate::error::ErrorKind;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider identity normalized to one shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    /// Provider name
    pub provider: String,
    /// Provider-side user id
    pub provider_id: String,
    /// Email, lowercased
    pub email: Option<String>,
    /// Display name
    pub name: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Whether the provider vouches for the email
    pub verified_email: bool,
}

/// Value stored under `oauth_state:<state>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
    /// Provider the flow was started for
    pub provider: String,
    /// Redirect URI the flow was started with
    pub redirect_uri: String,
    /// Start time
    pub created_at: DateTime<Utc>,
}

/// Authorization URL and the state bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    /// URL to redirect the user agent to
    pub url: String,
    /// State value the callback must return
    pub state: String,
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct ProviderTokens {
    /// Provider access token
    pub access_token: String,
    /// Token type, usually `bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Provider refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OpenID Connect id token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for ProviderTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTokens")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Federation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FederationError {
    /// No credentials configured for the provider
    #[error("provider '{0}' is not configured")]
    UnconfiguredProvider(String),

    /// State missing, expired, consumed or bound to another flow
    #[error("oauth state invalid or expired")]
    InvalidOrExpiredState,

    /// Token endpoint failed or returned no access token
    #[error("token exchange with {provider} failed: {reason}")]
    ProviderTokenExchangeFailed {
        /// Provider name
        provider: String,
        /// Failure detail, free of secrets
        reason: String,
    },

    /// User-info endpoint failed or returned an unusable document
    #[error("user info from {provider} failed: {reason}")]
    ProviderUserInfoFailed {
        /// Provider name
        provider: String,
        /// Failure detail, free of secrets
        reason: String,
    },

    /// State registry unavailable
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FederationError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnconfiguredProvider(_)
            | Self::ProviderTokenExchangeFailed { .. }
            | Self::ProviderUserInfoFailed { .. } => ErrorKind::ProviderError,
            Self::InvalidOrExpiredState => ErrorKind::StateInvalid,
            Self::Store(_) => ErrorKind::StoreUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_tokens_debug_redacts() {
        let tokens: ProviderTokens =
            serde_json::from_str(r#"{"access_token":"ya29.secret","refresh_token":"1//r","token_type":"Bearer"}"#)
                .unwrap();
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("ya29.secret"));
        assert!(!debug.contains("1//r"));
        assert!(debug.contains("Bearer"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(FederationError::InvalidOrExpiredState.kind(), ErrorKind::StateInvalid);
        assert_eq!(
            FederationError::UnconfiguredProvider("x".into()).kind(),
            ErrorKind::ProviderError
        );
    }
}
