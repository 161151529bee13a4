//! Key management for token envelopes.
//!
//! The key strategy is resolved exactly once at startup:
//! - `Configured`: signing and encryption keys come from configuration
//! - `Ephemeral`: missing keys are generated for the process lifetime
//! - `Fallback`: the asymmetric/AEAD primitives failed and an HS256 signer
//!   takes over (only when `TOKEN_ALLOW_FALLBACK` permits it)

pub mod envelope;
pub mod fallback;
pub mod keys;

pub use envelope::{Protection, TokenPurpose};
pub use fallback::FallbackSigner;
pub use keys::{GeneratedKeyMaterial, TokenKeys};

use crate::config::KeyConfig;
use crate::error::ConfigError;
use crate::metrics;
use crate::token::TokenError;
use tracing::{error, info, warn};

/// Resolved key material.
#[derive(Debug)]
pub enum KeyStrategy {
    /// Keys supplied by configuration
    Configured(TokenKeys),
    /// Keys generated at startup
    Ephemeral(TokenKeys),
    /// HS256 fallback after a primitive failure
    Fallback(FallbackSigner),
}

impl KeyStrategy {
    /// Resolve the key strategy from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for configured but unusable keys and
    /// `ConfigError::KeyUnavailable` when the primitives fail and fallback
    /// is disallowed.
    pub fn resolve(config: &KeyConfig) -> Result<Self, ConfigError> {
        let strategy = match (&config.signing_key, &config.encryption_key) {
            (Some(signing), Some(encryption)) => {
                let keys = TokenKeys::from_config(signing, encryption)?;
                match keys.self_test() {
                    Ok(()) => Self::Configured(keys),
                    Err(e) => Self::degrade(config, &e)?,
                }
            }
            (signing, encryption) => {
                match TokenKeys::from_partial(signing.as_ref(), encryption.as_ref()) {
                    Ok(keys) => match keys.self_test() {
                        Ok(()) => {
                            Self::log_generated(&keys, signing.is_none(), encryption.is_none());
                            Self::Ephemeral(keys)
                        }
                        Err(e) => Self::degrade(config, &e)?,
                    },
                    Err(ConfigError::KeyUnavailable(reason)) => {
                        Self::degrade(config, &TokenError::KeyUnavailable(reason))?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        metrics::set_key_strategy(strategy.name());
        info!(strategy = strategy.name(), "token key strategy resolved");
        Ok(strategy)
    }

    /// Strategy backed by freshly generated keys, for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::KeyUnavailable` if key generation fails.
    pub fn generate() -> Result<Self, TokenError> {
        TokenKeys::generate().map(Self::Ephemeral)
    }

    fn degrade(config: &KeyConfig, cause: &TokenError) -> Result<Self, ConfigError> {
        if !config.allow_fallback {
            error!(error = %cause, "token key primitives unavailable and fallback disabled");
            return Err(ConfigError::KeyUnavailable(cause.to_string()));
        }
        error!(
            error = %cause,
            "token key primitives unavailable; using reduced-security HS256 fallback"
        );
        metrics::record_security_event("KEY_FALLBACK_ENGAGED");
        metrics::set_key_strategy("fallback");
        Ok(Self::Fallback(FallbackSigner::ephemeral()))
    }

    fn log_generated(keys: &TokenKeys, signing_generated: bool, encryption_generated: bool) {
        let material = keys.export();
        if signing_generated {
            warn!(
                signing_key = %material.signing_key.as_str(),
                public_key = %material.public_key,
                "TOKEN_SIGNING_KEY not configured; generated an ephemeral key, tokens will not survive a restart"
            );
        }
        if encryption_generated {
            warn!(
                encryption_key = %material.encryption_key.as_str(),
                "TOKEN_ENCRYPTION_KEY not configured; generated an ephemeral key, refresh tokens will not survive a restart"
            );
        }
    }

    /// Strategy name used in logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Configured(_) => "configured",
            Self::Ephemeral(_) => "ephemeral",
            Self::Fallback(_) => "fallback",
        }
    }

    /// Ed25519 public key for resource servers, absent in fallback mode.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8]> {
        match self {
            Self::Configured(keys) | Self::Ephemeral(keys) => Some(keys.public_key()),
            Self::Fallback(_) => None,
        }
    }

    /// Protect `payload` for `purpose`.
    ///
    /// # Errors
    ///
    /// See [`TokenKeys::seal`] and [`FallbackSigner::seal`].
    pub fn seal(&self, purpose: TokenPurpose, payload: &[u8]) -> Result<String, TokenError> {
        match self {
            Self::Configured(keys) | Self::Ephemeral(keys) => keys.seal(purpose, payload),
            Self::Fallback(signer) => signer.seal(purpose, payload),
        }
    }

    /// Authenticate `token` and return its purpose and payload.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Malformed` for a token in a format the active
    /// strategy does not issue, or one that fails authentication.
    pub fn open(&self, token: &str) -> Result<(TokenPurpose, Vec<u8>), TokenError> {
        match self {
            Self::Configured(keys) | Self::Ephemeral(keys) => keys.open(token),
            Self::Fallback(_) if envelope::is_envelope(token) => {
                Err(TokenError::malformed("envelope tokens are not accepted in fallback mode"))
            }
            Self::Fallback(signer) => signer.open(token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[test]
    fn test_missing_keys_resolve_ephemeral() {
        let _guard = metrics::KEY_STRATEGY_TEST_LOCK.blocking_lock();
        let strategy = KeyStrategy::resolve(&KeyConfig::default()).unwrap();
        assert_eq!(strategy.name(), "ephemeral");
        assert!(strategy.public_key().is_some());
    }

    #[test]
    fn test_configured_keys_resolve_configured() {
        let _guard = metrics::KEY_STRATEGY_TEST_LOCK.blocking_lock();
        let material = TokenKeys::generate().unwrap().export();
        let config = KeyConfig {
            signing_key: Some(SecretString::from(material.signing_key.to_string())),
            encryption_key: Some(SecretString::from(material.encryption_key.to_string())),
            allow_fallback: false,
        };

        let strategy = KeyStrategy::resolve(&config).unwrap();
        assert_eq!(strategy.name(), "configured");
    }

    #[test]
    fn test_invalid_configured_key_is_hard_failure() {
        let config = KeyConfig {
            signing_key: Some(SecretString::from("%%%".to_string())),
            encryption_key: None,
            allow_fallback: true,
        };
        assert!(matches!(
            KeyStrategy::resolve(&config),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_degrade_engages_fallback_when_allowed() {
        let _guard = metrics::KEY_STRATEGY_TEST_LOCK.blocking_lock();
        let events = || {
            metrics::SECURITY_EVENTS
                .with_label_values(&["KEY_FALLBACK_ENGAGED"])
                .get()
        };
        let before = events();
        let config = KeyConfig {
            allow_fallback: true,
            ..KeyConfig::default()
        };

        let strategy =
            KeyStrategy::degrade(&config, &TokenError::KeyUnavailable("rng failure".into())).unwrap();
        assert!(matches!(strategy, KeyStrategy::Fallback(_)));
        assert!(strategy.public_key().is_none());
        assert_eq!(metrics::KEY_STRATEGY.with_label_values(&["fallback"]).get(), 1);
        assert_eq!(metrics::KEY_STRATEGY.with_label_values(&["ephemeral"]).get(), 0);
        assert!(events() > before);
    }

    #[test]
    fn test_degrade_without_fallback_is_key_unavailable() {
        let config = KeyConfig {
            allow_fallback: false,
            ..KeyConfig::default()
        };
        let result = KeyStrategy::degrade(&config, &TokenError::KeyUnavailable("rng failure".into()));
        assert!(matches!(
            result,
            Err(ConfigError::KeyUnavailable(ref reason)) if reason.contains("rng failure")
        ));
    }

    #[test]
    fn test_fallback_rejects_envelopes() {
        let ephemeral = KeyStrategy::generate().unwrap();
        let fallback = KeyStrategy::Fallback(FallbackSigner::ephemeral());

        let token = ephemeral.seal(TokenPurpose::Access, b"{}").unwrap();
        assert!(matches!(fallback.open(&token), Err(TokenError::Malformed(_))));

        let jwt = fallback.seal(TokenPurpose::Access, b"{}").unwrap();
        assert!(matches!(ephemeral.open(&jwt), Err(TokenError::Malformed(_))));
    }
}
