//! Startup wiring: every service is built once here and shared through `Arc`.

use crate::auth::{AuditSink, AuthOrchestrator, PrincipalRepository};
use crate::config::Config;
use crate::crypto::KeyStrategy;
use crate::dpop::ProofOfPossessionService;
use crate::error::ConfigError;
use crate::federation::IdentityFederationService;
use crate::store::{self, RevocationRegistry, RevocationStore, StoreError};
use crate::token::TokenService;
use std::sync::Arc;
use tracing::info;

/// The assembled authentication core.
#[derive(Debug, Clone)]
pub struct AuthCore {
    /// Active key strategy
    pub keys: Arc<KeyStrategy>,
    /// Revocation registry with the configured failure policy
    pub registry: Arc<RevocationRegistry>,
    /// Token issuance and verification
    pub tokens: Arc<TokenService>,
    /// Proof-of-possession checks and nonces
    pub proofs: Arc<ProofOfPossessionService>,
    /// OAuth federation
    pub federation: Arc<IdentityFederationService>,
    /// Session orchestration
    pub orchestrator: Arc<AuthOrchestrator>,
}

impl AuthCore {
    /// Build the core from configuration, connecting the configured
    /// revocation backend.
    ///
    /// # Errors
    ///
    /// Any `ConfigError`: policy violations, unusable keys with fallback
    /// disabled, an unreachable store or a bad provider configuration.
    pub async fn from_config(
        config: &Config,
        principals: Arc<dyn PrincipalRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        config.policy.validate()?;
        let store = store::connect(&config.store).await?;
        Self::with_store(config, store, principals, audit)
    }

    /// Build the core over an already-constructed store.
    ///
    /// # Errors
    ///
    /// As [`AuthCore::from_config`], minus store connection.
    pub fn with_store(
        config: &Config,
        store: Arc<dyn RevocationStore>,
        principals: Arc<dyn PrincipalRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        config.policy.validate()?;
        let keys = Arc::new(KeyStrategy::resolve(&config.keys)?);
        let registry = Arc::new(RevocationRegistry::new(store, config.store.failure_policy));
        let tokens = Arc::new(TokenService::new(Arc::clone(&keys), config.policy.clone()));
        let proofs = Arc::new(ProofOfPossessionService::new(
            Arc::clone(&tokens),
            Arc::clone(&registry),
        ));
        let federation = Arc::new(IdentityFederationService::new(
            &config.federation,
            Arc::clone(&registry),
            config.policy.oauth_state_ttl,
        )?);
        let orchestrator = Arc::new(AuthOrchestrator::new(
            Arc::clone(&tokens),
            Arc::clone(&proofs),
            Arc::clone(&registry),
            Arc::clone(&federation),
            principals,
            audit,
        ));

        info!(
            key_strategy = keys.name(),
            store = registry.store().backend(),
            failure_policy = registry.policy().as_str(),
            providers = ?federation.providers(),
            "auth core ready"
        );

        Ok(Self {
            keys,
            registry,
            tokens,
            proofs,
            federation,
            orchestrator,
        })
    }

    /// Probe the revocation store.
    ///
    /// # Errors
    ///
    /// The store's error when it does not answer.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.registry.store().health_check().await
    }
}
