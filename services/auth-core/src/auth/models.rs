//! Request and response types exchanged with the orchestrator.

use super::principal::PrincipalView;
use crate::token::IssuedPair;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Token scheme advertised to clients.
pub const TOKEN_TYPE_DPOP: &str = "DPoP";

/// Password registration input.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Email, unique across principals
    pub email: String,
    /// Plain password, hashed before storage
    pub password: SecretString,
    /// Optional login name
    #[serde(default)]
    pub username: Option<String>,
    /// Optional display name
    #[serde(default)]
    pub display_name: Option<String>,
}

impl RegisterRequest {
    /// Minimal request with email and password.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
            username: None,
            display_name: None,
        }
    }
}

/// Issued credentials returned by login, registration and refresh.
#[derive(Clone, Serialize)]
pub struct TokenResponse {
    /// Access envelope
    pub access_token: String,
    /// Refresh envelope
    pub refresh_token: String,
    /// Always `DPoP`
    pub token_type: &'static str,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Principal the tokens were issued to
    pub user: PrincipalView,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("user", &self.user)
            .finish()
    }
}

impl TokenResponse {
    pub(crate) fn new(pair: IssuedPair, user: PrincipalView) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: TOKEN_TYPE_DPOP,
            expires_in: pair.expires_in,
            user,
        }
    }
}
