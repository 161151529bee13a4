//! Authorization-code flow against configured providers.

use super::providers::{builtin, ProviderSpec};
use super::{AuthorizationRequest, FederatedIdentity, FederationError, OAuthState, ProviderTokens};
use crate::config::FederationConfig;
use crate::error::ConfigError;
use crate::metrics;
use crate::store::RevocationRegistry;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

const USER_AGENT: &str = concat!("auth-core/", env!("CARGO_PKG_VERSION"));

struct ConfiguredProvider {
    spec: &'static ProviderSpec,
    client_id: String,
    client_secret: SecretString,
    authorize_url: Url,
    token_url: Url,
    userinfo_url: Url,
}

/// OAuth federation with external identity providers.
///
/// States are single-use and bound to the provider and redirect URI they
/// were issued for; the binding is checked before any provider is called.
pub struct IdentityFederationService {
    providers: HashMap<String, ConfiguredProvider>,
    registry: Arc<RevocationRegistry>,
    http: reqwest::Client,
    state_ttl: Duration,
}

impl std::fmt::Debug for IdentityFederationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityFederationService")
            .field("providers", &self.providers())
            .field("state_ttl", &self.state_ttl)
            .finish_non_exhaustive()
    }
}

impl IdentityFederationService {
    /// Build the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for an unknown provider, an unparseable
    /// endpoint URL, or an HTTP client that cannot be built.
    pub fn new(
        config: &FederationConfig,
        registry: Arc<RevocationRegistry>,
        state_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let mut providers = HashMap::new();
        for (name, credentials) in &config.providers {
            let spec = builtin(name)
                .ok_or_else(|| ConfigError::invalid("OAUTH_PROVIDER", format!("unknown provider '{name}'")))?;
            let endpoint = |configured: &Option<String>, default: &str| {
                let raw = configured.as_deref().unwrap_or(default);
                Url::parse(raw).map_err(|e| {
                    ConfigError::invalid("OAUTH_PROVIDER_URL", format!("{}: '{raw}': {e}", spec.name))
                })
            };
            providers.insert(
                spec.name.to_string(),
                ConfiguredProvider {
                    spec,
                    client_id: credentials.client_id.clone(),
                    client_secret: credentials.client_secret.clone(),
                    authorize_url: endpoint(&credentials.authorize_url, spec.authorize_url)?,
                    token_url: endpoint(&credentials.token_url, spec.token_url)?,
                    userinfo_url: endpoint(&credentials.userinfo_url, spec.userinfo_url)?,
                },
            );
        }

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            providers,
            registry,
            http,
            state_ttl,
        })
    }

    /// Names of configured providers, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether `provider` has credentials.
    #[must_use]
    pub fn is_configured(&self, provider: &str) -> bool {
        self.providers.contains_key(&provider.to_ascii_lowercase())
    }

    fn provider(&self, provider: &str) -> Result<&ConfiguredProvider, FederationError> {
        self.providers
            .get(provider)
            .ok_or_else(|| FederationError::UnconfiguredProvider(provider.to_string()))
    }

    /// Build the provider authorization URL and record its state.
    ///
    /// # Errors
    ///
    /// `UnconfiguredProvider`, or `Store` if the state cannot be recorded.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn generate_authorization_url(
        &self,
        provider: &str,
        redirect_uri: &str,
        state: Option<String>,
    ) -> Result<AuthorizationRequest, FederationError> {
        let provider = provider.to_ascii_lowercase();
        let configured = self.provider(&provider)?;
        let state = state.unwrap_or_else(random_state);

        let binding = OAuthState {
            provider: provider.clone(),
            redirect_uri: redirect_uri.to_string(),
            created_at: chrono::Utc::now(),
        };
        let value = serde_json::to_string(&binding).map_err(crate::store::StoreError::from)?;
        self.registry.put_state(&state, &value, self.state_ttl).await?;

        let mut url = configured.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &configured.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("state", &state);
            if !configured.spec.scopes.is_empty() {
                query.append_pair("scope", &configured.spec.scopes.join(" "));
            }
        }

        debug!("authorization url issued");
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
        })
    }

    /// Exchange an authorization code for provider tokens.
    ///
    /// The state is consumed first, so a replayed callback fails even when
    /// the code is valid.
    ///
    /// # Errors
    ///
    /// `InvalidOrExpiredState`, `UnconfiguredProvider`,
    /// `ProviderTokenExchangeFailed` or `Store`.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn exchange_code_for_token(
        &self,
        provider: &str,
        code: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<ProviderTokens, FederationError> {
        let provider = provider.to_ascii_lowercase();
        let stored = self
            .registry
            .take_state(state)
            .await?
            .ok_or(FederationError::InvalidOrExpiredState)?;
        let binding: OAuthState =
            serde_json::from_str(&stored).map_err(|_| FederationError::InvalidOrExpiredState)?;
        if binding.provider != provider || binding.redirect_uri != redirect_uri {
            warn!(
                bound_provider = %binding.provider,
                "oauth state presented for a different provider or redirect uri"
            );
            metrics::record_security_event("OAUTH_STATE_MISMATCH");
            return Err(FederationError::InvalidOrExpiredState);
        }

        let configured = self.provider(&provider)?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", configured.client_id.as_str()),
            ("client_secret", configured.client_secret.expose_secret()),
        ];
        if configured.spec.state_in_token_request {
            form.push(("state", state));
        }

        let exchange_failed = |reason: String| {
            metrics::record_provider_request(&provider, "token", "error");
            FederationError::ProviderTokenExchangeFailed {
                provider: provider.clone(),
                reason,
            }
        };

        let response = self
            .http
            .post(configured.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| exchange_failed(e.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(exchange_failed(format!("status {}", response.status())));
        }
        let tokens: ProviderTokens = response
            .json()
            .await
            .map_err(|_| exchange_failed("response has no access_token".to_string()))?;

        metrics::record_provider_request(&provider, "token", "success");
        Ok(tokens)
    }

    /// Fetch the raw user-info document.
    ///
    /// # Errors
    ///
    /// `UnconfiguredProvider` or `ProviderUserInfoFailed`.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn get_user_info(&self, provider: &str, access_token: &str) -> Result<Value, FederationError> {
        let provider = provider.to_ascii_lowercase();
        let configured = self.provider(&provider)?;

        let failed = |reason: String| {
            metrics::record_provider_request(&provider, "userinfo", "error");
            FederationError::ProviderUserInfoFailed {
                provider: provider.clone(),
                reason,
            }
        };

        let response = self
            .http
            .get(configured.userinfo_url.clone())
            .bearer_auth(access_token)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| failed(e.without_url().to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("status {}", response.status())));
        }
        let raw: Value = response
            .json()
            .await
            .map_err(|_| failed("response is not JSON".to_string()))?;

        metrics::record_provider_request(&provider, "userinfo", "success");
        Ok(raw)
    }

    /// Map a user-info document through the provider's field table.
    ///
    /// # Errors
    ///
    /// `UnconfiguredProvider` for a provider without a table entry,
    /// `ProviderUserInfoFailed` when the document has no id.
    pub fn normalize_user_info(&self, provider: &str, raw: &Value) -> Result<FederatedIdentity, FederationError> {
        let spec = builtin(provider).ok_or_else(|| FederationError::UnconfiguredProvider(provider.to_string()))?;
        spec.fields.normalize(spec.name, raw)
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderCredentials, RevocationFailurePolicy};
    use crate::store::MemoryRevocationStore;

    fn service() -> IdentityFederationService {
        let mut config = FederationConfig::default();
        config
            .providers
            .insert("google".to_string(), ProviderCredentials::new("client-1", "secret-1"));
        let registry = Arc::new(RevocationRegistry::new(
            Arc::new(MemoryRevocationStore::new()),
            RevocationFailurePolicy::FailClosed,
        ));
        IdentityFederationService::new(&config, registry, Duration::from_secs(300)).unwrap()
    }

    #[tokio::test]
    async fn test_authorization_url_carries_state() {
        let service = service();
        let request = service
            .generate_authorization_url("google", "https://app.example.com/cb", None)
            .await
            .unwrap();

        let url = Url::parse(&request.url).unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "https://app.example.com/cb");
        assert_eq!(params["state"], request.state);
        assert_eq!(params["scope"], "openid email profile");
        assert!(!request.url.contains("secret-1"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let service = service();
        assert!(matches!(
            service.generate_authorization_url("github", "https://a/cb", None).await,
            Err(FederationError::UnconfiguredProvider(_))
        ));
        assert!(service.is_configured("Google"));
        assert_eq!(service.providers(), vec!["google"]);
    }

    #[tokio::test]
    async fn test_unknown_state_rejected_before_provider_lookup() {
        let service = service();
        assert!(matches!(
            service.exchange_code_for_token("nowhere", "code", "https://a/cb", "forged").await,
            Err(FederationError::InvalidOrExpiredState)
        ));
    }

    #[tokio::test]
    async fn test_state_bound_to_redirect_uri_and_consumed() {
        let service = service();
        let request = service
            .generate_authorization_url("google", "https://app.example.com/cb", Some("fixed".to_string()))
            .await
            .unwrap();
        assert_eq!(request.state, "fixed");

        assert!(matches!(
            service
                .exchange_code_for_token("google", "code", "https://evil.example.com/cb", "fixed")
                .await,
            Err(FederationError::InvalidOrExpiredState)
        ));
        assert!(matches!(
            service
                .exchange_code_for_token("google", "code", "https://app.example.com/cb", "fixed")
                .await,
            Err(FederationError::InvalidOrExpiredState)
        ));
    }

    #[test]
    fn test_unknown_provider_in_config_rejected() {
        let mut config = FederationConfig::default();
        config
            .providers
            .insert("myspace".to_string(), ProviderCredentials::new("a", "b"));
        let registry = Arc::new(RevocationRegistry::new(
            Arc::new(MemoryRevocationStore::new()),
            RevocationFailurePolicy::FailClosed,
        ));
        assert!(IdentityFederationService::new(&config, registry, Duration::from_secs(300)).is_err());
    }
}
