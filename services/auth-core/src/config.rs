//! Centralized configuration for the authentication core.
//!
//! All configuration is loaded from environment variables and validated
//! at startup. Values are grouped by the component that consumes them.

use crate::error::ConfigError;
use crate::federation::providers::BUILTIN_PROVIDERS;
use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Lifetimes and windows applied to every token the core issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    /// Access token lifetime used by `issue_pair`
    pub access_ttl: Duration,
    /// Upper bound for any access token lifetime
    pub access_max_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Accepted distance between a proof's `iat` and now
    pub proof_max_age: Duration,
    /// Nonce lifetime
    pub nonce_ttl: Duration,
    /// OAuth state lifetime
    pub oauth_state_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::from_secs(1800),
            access_max_ttl: Duration::from_secs(1800),
            refresh_ttl: Duration::from_secs(2_592_000),
            proof_max_age: Duration::from_secs(60),
            nonce_ttl: Duration::from_secs(300),
            oauth_state_ttl: Duration::from_secs(300),
        }
    }
}

impl TokenPolicy {
    /// Check the cross-field invariants of the policy.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Policy` when a window is zero, the access TTL
    /// exceeds its maximum, or the refresh TTL does not outlive every access
    /// token.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("ACCESS_TOKEN_TTL", self.access_ttl),
            ("ACCESS_TOKEN_MAX_TTL", self.access_max_ttl),
            ("REFRESH_TOKEN_TTL", self.refresh_ttl),
            ("DPOP_MAX_AGE", self.proof_max_age),
            ("NONCE_TTL", self.nonce_ttl),
            ("OAUTH_STATE_TTL", self.oauth_state_ttl),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, d)| d.as_secs() == 0) {
            return Err(ConfigError::Policy(format!("{name} must be at least one second")));
        }
        if self.access_ttl > self.access_max_ttl {
            return Err(ConfigError::Policy(format!(
                "ACCESS_TOKEN_TTL ({}s) exceeds ACCESS_TOKEN_MAX_TTL ({}s)",
                self.access_ttl.as_secs(),
                self.access_max_ttl.as_secs()
            )));
        }
        if self.refresh_ttl <= self.access_max_ttl {
            return Err(ConfigError::Policy(format!(
                "REFRESH_TOKEN_TTL ({}s) must be greater than ACCESS_TOKEN_MAX_TTL ({}s)",
                self.refresh_ttl.as_secs(),
                self.access_max_ttl.as_secs()
            )));
        }
        Ok(())
    }
}

/// Key material sources. Absent values are generated at startup.
#[derive(Debug, Clone)]
pub struct KeyConfig {
    /// Base64 Ed25519 PKCS#8 document (`TOKEN_SIGNING_KEY`)
    pub signing_key: Option<SecretString>,
    /// Base64 32-byte AES-256 key (`TOKEN_ENCRYPTION_KEY`)
    pub encryption_key: Option<SecretString>,
    /// Whether the HMAC fallback may engage (`TOKEN_ALLOW_FALLBACK`)
    pub allow_fallback: bool,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            encryption_key: None,
            allow_fallback: true,
        }
    }
}

/// Revocation store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationBackend {
    /// Shared Redis instance
    Redis,
    /// Process-local map
    Memory,
}

impl std::str::FromStr for RevocationBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend '{other}', expected redis or memory")),
        }
    }
}

/// Decision applied when the revocation store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationFailurePolicy {
    /// Treat the request as failed
    #[default]
    FailClosed,
    /// Proceed as if the token were not revoked, logging the degradation
    FailOpen,
}

impl RevocationFailurePolicy {
    /// Policy name as configured.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailClosed => "fail_closed",
            Self::FailOpen => "fail_open",
        }
    }
}

impl std::str::FromStr for RevocationFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "closed" => Ok(Self::FailClosed),
            "fail_open" | "open" => Ok(Self::FailOpen),
            other => Err(format!("unknown policy '{other}', expected fail_closed or fail_open")),
        }
    }
}

/// Revocation store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Selected backend
    pub backend: RevocationBackend,
    /// Redis connection URL
    pub redis_url: SecretString,
    /// Prefix applied to every key
    pub namespace: String,
    /// Deadline for a single store attempt
    pub op_timeout: Duration,
    /// Backoff before the single retry
    pub retry_backoff: Duration,
    /// Behaviour when the store is unavailable
    pub failure_policy: RevocationFailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: RevocationBackend::Redis,
            redis_url: SecretString::from("redis://127.0.0.1:6379".to_string()),
            namespace: "auth".to_string(),
            op_timeout: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(50),
            failure_policy: RevocationFailurePolicy::FailClosed,
        }
    }
}

/// Credentials and endpoint overrides for one OAuth provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: SecretString,
    /// Authorization endpoint override
    pub authorize_url: Option<String>,
    /// Token endpoint override
    pub token_url: Option<String>,
    /// User info endpoint override
    pub userinfo_url: Option<String>,
}

impl ProviderCredentials {
    /// Credentials using the provider's default endpoints.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            authorize_url: None,
            token_url: None,
            userinfo_url: None,
        }
    }

    /// Point every endpoint at `base` (used against mock providers).
    #[must_use]
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.authorize_url = Some(format!("{base}/authorize"));
        self.token_url = Some(format!("{base}/token"));
        self.userinfo_url = Some(format!("{base}/userinfo"));
        self
    }
}

/// OAuth federation settings.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Configured providers by lowercase name
    pub providers: HashMap<String, ProviderCredentials>,
    /// Request timeout for provider calls
    pub http_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

/// Logging settings handed to `rust_common::init_tracing`.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// JSON output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Authentication core configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Token lifetimes
    pub policy: TokenPolicy,
    /// Key material
    pub keys: KeyConfig,
    /// Revocation store
    pub store: StoreConfig,
    /// OAuth providers
    pub federation: FederationConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables (and `.env`).
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid, or the
    /// resulting token policy is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let policy = TokenPolicy {
            access_ttl: vars.secs("ACCESS_TOKEN_TTL", 1800)?,
            access_max_ttl: vars.secs("ACCESS_TOKEN_MAX_TTL", 1800)?,
            refresh_ttl: vars.secs("REFRESH_TOKEN_TTL", 2_592_000)?,
            proof_max_age: vars.secs("DPOP_MAX_AGE", 60)?,
            nonce_ttl: vars.secs("NONCE_TTL", 300)?,
            oauth_state_ttl: vars.secs("OAUTH_STATE_TTL", 300)?,
        };
        policy.validate()?;

        let keys = KeyConfig {
            signing_key: vars.secret("TOKEN_SIGNING_KEY"),
            encryption_key: vars.secret("TOKEN_ENCRYPTION_KEY"),
            allow_fallback: vars.parse("TOKEN_ALLOW_FALLBACK", true)?,
        };

        let store = StoreConfig {
            backend: vars.parse("REVOCATION_BACKEND", RevocationBackend::Redis)?,
            redis_url: SecretString::from(
                vars.get("REDIS_URL")
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            ),
            namespace: vars.get("REDIS_NAMESPACE").unwrap_or_else(|| "auth".to_string()),
            op_timeout: Duration::from_millis(vars.parse("REDIS_OP_TIMEOUT_MS", 500)?),
            retry_backoff: Duration::from_millis(vars.parse("REDIS_RETRY_BACKOFF_MS", 50)?),
            failure_policy: vars.parse(
                "REVOCATION_FAILURE_POLICY",
                RevocationFailurePolicy::FailClosed,
            )?,
        };
        if store.op_timeout.is_zero() {
            return Err(ConfigError::invalid("REDIS_OP_TIMEOUT_MS", "must be positive"));
        }

        let mut providers = HashMap::new();
        for spec in BUILTIN_PROVIDERS {
            let prefix = format!("OAUTH_{}", spec.name.to_ascii_uppercase());
            let (Some(client_id), Some(client_secret)) = (
                vars.get(&format!("{prefix}_CLIENT_ID")),
                vars.get(&format!("{prefix}_CLIENT_SECRET")),
            ) else {
                continue;
            };
            providers.insert(
                spec.name.to_string(),
                ProviderCredentials {
                    client_id,
                    client_secret: SecretString::from(client_secret),
                    authorize_url: vars.get(&format!("{prefix}_AUTHORIZE_URL")),
                    token_url: vars.get(&format!("{prefix}_TOKEN_URL")),
                    userinfo_url: vars.get(&format!("{prefix}_USERINFO_URL")),
                },
            );
        }
        let federation = FederationConfig {
            providers,
            http_timeout: vars.secs("OAUTH_HTTP_TIMEOUT", 10)?,
        };

        let logging = LoggingConfig {
            level: vars.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: vars.parse("LOG_JSON", false)?,
        };

        Ok(Self {
            policy,
            keys,
            store,
            federation,
            logging,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn secret(&self, name: &str) -> Option<SecretString> {
        self.get(name).map(SecretString::from)
    }

    /// Parse environment variable with default value.
    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(val) => val
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(name, e.to_string())),
            None => Ok(default),
        }
    }

    fn secs(&self, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(name, default).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.policy, TokenPolicy::default());
        assert_eq!(config.policy.access_ttl, Duration::from_secs(1800));
        assert_eq!(config.store.backend, RevocationBackend::Redis);
        assert_eq!(config.store.failure_policy, RevocationFailurePolicy::FailClosed);
        assert_eq!(config.store.op_timeout, Duration::from_millis(500));
        assert_eq!(config.federation.http_timeout, Duration::from_secs(10));
        assert!(config.federation.providers.is_empty());
        assert!(config.keys.allow_fallback);
        assert!(config.keys.signing_key.is_none());
    }

    #[test]
    fn test_access_ttl_above_max_rejected() {
        let err = Config::from_lookup(lookup(&[("ACCESS_TOKEN_TTL", "3600")])).unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));
    }

    #[test]
    fn test_refresh_must_outlive_access_max() {
        let err = Config::from_lookup(lookup(&[("REFRESH_TOKEN_TTL", "1800")])).unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));
    }

    #[test]
    fn test_zero_proof_age_rejected() {
        let err = Config::from_lookup(lookup(&[("DPOP_MAX_AGE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = Config::from_lookup(lookup(&[("NONCE_TTL", "soon")])).unwrap_err();
        assert!(err.to_string().contains("NONCE_TTL"));
    }

    #[test]
    fn test_store_settings() {
        let config = Config::from_lookup(lookup(&[
            ("REVOCATION_BACKEND", "memory"),
            ("REVOCATION_FAILURE_POLICY", "fail-open"),
            ("REDIS_NAMESPACE", "tenant-a"),
        ]))
        .unwrap();

        assert_eq!(config.store.backend, RevocationBackend::Memory);
        assert_eq!(config.store.failure_policy, RevocationFailurePolicy::FailOpen);
        assert_eq!(config.store.namespace, "tenant-a");
    }

    #[test]
    fn test_provider_requires_id_and_secret() {
        let config = Config::from_lookup(lookup(&[
            ("OAUTH_GOOGLE_CLIENT_ID", "g-id"),
            ("OAUTH_GOOGLE_CLIENT_SECRET", "g-secret"),
            ("OAUTH_KAKAO_CLIENT_ID", "k-id"),
            ("OAUTH_NAVER_CLIENT_ID", "n-id"),
            ("OAUTH_NAVER_CLIENT_SECRET", "n-secret"),
            ("OAUTH_NAVER_TOKEN_URL", "http://localhost:9000/token"),
        ]))
        .unwrap();

        let google = &config.federation.providers["google"];
        assert_eq!(google.client_id, "g-id");
        assert_eq!(google.client_secret.expose_secret(), "g-secret");
        assert!(!config.federation.providers.contains_key("kakao"));
        assert_eq!(
            config.federation.providers["naver"].token_url.as_deref(),
            Some("http://localhost:9000/token")
        );
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let config = Config::from_lookup(lookup(&[
            ("OAUTH_GITHUB_CLIENT_ID", "gh-id"),
            ("OAUTH_GITHUB_CLIENT_SECRET", "very-secret-value"),
            ("TOKEN_ENCRYPTION_KEY", "c2VjcmV0LWtleS1tYXRlcmlhbA=="),
        ]))
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-value"));
        assert!(!debug.contains("c2VjcmV0LWtleS1tYXRlcmlhbA=="));
    }
}
