//! Principal model and the repository seam the core consumes.

use crate::token::TokenSubject;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;

/// How a principal proves its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    /// Email or username with a password
    Password,
    /// Federated login through the named provider
    OAuth(String),
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password => f.write_str("password"),
            Self::OAuth(provider) => write!(f, "oauth:{provider}"),
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "password" => Ok(Self::Password),
            Some(("oauth", provider)) if !provider.is_empty() => Ok(Self::OAuth(provider.to_string())),
            _ => Err(format!("unknown auth method '{s}'")),
        }
    }
}

impl Serialize for AuthMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AuthMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// An account known to the principal repository.
#[derive(Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Stable id
    pub id: String,
    /// Email, lowercased
    pub email: String,
    /// Optional login name
    pub username: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Role carried in token claims
    pub role: String,
    /// How the principal authenticates
    pub auth_method: AuthMethod,
    /// Argon2 PHC string
    pub password_hash: Option<String>,
    /// Linked federation provider
    pub provider: Option<String>,
    /// Provider-side user id
    pub provider_id: Option<String>,
    /// Avatar URL
    pub picture: Option<String>,
    /// Whether the email is verified
    pub email_verified: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful login
    pub last_login_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("auth_method", &self.auth_method)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "[REDACTED]"))
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Role given to principals created by registration or first federated login.
pub const DEFAULT_ROLE: &str = "user";

impl Principal {
    /// New password principal with a fresh id.
    #[must_use]
    pub fn with_password(email: &str, password_hash: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_lowercase(),
            username: None,
            display_name: None,
            role: DEFAULT_ROLE.to_string(),
            auth_method: AuthMethod::Password,
            password_hash: Some(password_hash),
            provider: None,
            provider_id: None,
            picture: None,
            email_verified: false,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }

    /// Claims subject for this principal: email, id and role.
    #[must_use]
    pub fn subject(&self) -> TokenSubject {
        TokenSubject::new(self.email.clone(), self.id.clone(), self.role.clone())
    }

    /// Copy safe to hand to callers.
    #[must_use]
    pub fn public_view(&self) -> PrincipalView {
        PrincipalView {
            id: self.id.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            role: self.role.clone(),
            auth_method: self.auth_method.clone(),
            provider: self.provider.clone(),
            picture: self.picture.clone(),
            email_verified: self.email_verified,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

/// Principal without credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalView {
    /// Stable id
    pub id: String,
    /// Email, lowercased
    pub email: String,
    /// Optional login name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Role carried in token claims
    pub role: String,
    /// How the principal authenticates
    pub auth_method: AuthMethod,
    /// Linked federation provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Avatar URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Whether the email is verified
    pub email_verified: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last successful login
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Repository failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("principal repository: {0}")]
pub struct RepositoryError(pub String);

/// Principal persistence owned outside the core.
#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    /// Lookup by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<Principal>, RepositoryError>;

    /// Case-insensitive email lookup.
    async fn get_by_email(&self, email: &str) -> Result<Option<Principal>, RepositoryError>;

    /// Exact username lookup.
    async fn get_by_username(&self, username: &str) -> Result<Option<Principal>, RepositoryError>;

    /// Lookup by federated linkage. Repositories without linkage support
    /// keep the default and fall back to email matching.
    async fn get_by_provider(
        &self,
        _provider: &str,
        _provider_id: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        Ok(None)
    }

    /// Insert or replace by id.
    async fn upsert(&self, principal: Principal) -> Result<(), RepositoryError>;
}

/// In-process repository for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemoryPrincipalRepository {
    principals: RwLock<HashMap<String, Principal>>,
}

impl MemoryPrincipalRepository {
    /// Empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored principals.
    pub async fn len(&self) -> usize {
        self.principals.read().await.len()
    }

    /// Whether no principal is stored.
    pub async fn is_empty(&self) -> bool {
        self.principals.read().await.is_empty()
    }

    async fn find(&self, predicate: impl Fn(&Principal) -> bool + Send) -> Option<Principal> {
        self.principals.read().await.values().find(|p| predicate(p)).cloned()
    }
}

#[async_trait]
impl PrincipalRepository for MemoryPrincipalRepository {
    async fn get_by_id(&self, id: &str) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.principals.read().await.get(id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.find(|p| p.email.eq_ignore_ascii_case(email)).await)
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Principal>, RepositoryError> {
        Ok(self.find(|p| p.username.as_deref() == Some(username)).await)
    }

    async fn get_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<Principal>, RepositoryError> {
        Ok(self
            .find(|p| p.provider.as_deref() == Some(provider) && p.provider_id.as_deref() == Some(provider_id))
            .await)
    }

    async fn upsert(&self, principal: Principal) -> Result<(), RepositoryError> {
        self.principals.write().await.insert(principal.id.clone(), principal);
        Ok(())
    }
}
