//! Session lifecycle: register, login, federated login, refresh rotation,
//! logout, verification and proof-bound request authentication.
//!
//! Every failure leaves as an [`AuthError`]; callers show only
//! [`AuthError::public_message`]. The precise [`ErrorKind`] goes to the log,
//! the `auth_core_auth_operations_total` counter and the audit sink.

use super::audit::{self, AuditAction, AuditEvent, AuditSink};
use super::models::{RegisterRequest, TokenResponse};
use super::password;
use super::principal::{AuthMethod, Principal, PrincipalRepository, DEFAULT_ROLE};
use crate::dpop::ProofOfPossessionService;
use crate::error::{AuthError, ErrorKind};
use crate::federation::{AuthorizationRequest, FederatedIdentity, IdentityFederationService};
use crate::metrics;
use crate::store::RevocationRegistry;
use crate::token::{
    AccessTokenClaims, RefreshTokenClaims, TokenKind, TokenService, TokenSubject, TypedClaims,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Authorization scheme for proof-bound access tokens.
pub const DPOP_SCHEME: &str = "DPoP";

/// Claims released by a successful [`AuthOrchestrator::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Subject (email)
    pub sub: String,
    /// Principal id
    pub user_id: String,
    /// Role
    pub role: String,
    /// Token id
    pub jti: String,
    /// Kind of the verified token
    pub token_type: TokenKind,
    /// Expiry, unix seconds
    pub expires_at: i64,
}

impl VerifiedToken {
    fn from_claims<C: TypedClaims>(claims: &C) -> Self {
        let TokenSubject { sub, user_id, role } = claims.subject();
        Self {
            sub,
            user_id,
            role,
            jti: claims.jti().to_string(),
            token_type: claims.token_type(),
            expires_at: claims.expires_at(),
        }
    }
}

/// Composes tokens, proofs, revocation and federation with the principal
/// repository.
pub struct AuthOrchestrator {
    tokens: Arc<TokenService>,
    proofs: Arc<ProofOfPossessionService>,
    registry: Arc<RevocationRegistry>,
    federation: Arc<IdentityFederationService>,
    principals: Arc<dyn PrincipalRepository>,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for AuthOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthOrchestrator")
            .field("tokens", &self.tokens)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl AuthOrchestrator {
    /// Wire the orchestrator from already-built services.
    #[must_use]
    pub fn new(
        tokens: Arc<TokenService>,
        proofs: Arc<ProofOfPossessionService>,
        registry: Arc<RevocationRegistry>,
        federation: Arc<IdentityFederationService>,
        principals: Arc<dyn PrincipalRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tokens,
            proofs,
            registry,
            federation,
            principals,
            audit,
        }
    }

    /// Token service in use.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Proof service in use.
    #[must_use]
    pub fn proofs(&self) -> &Arc<ProofOfPossessionService> {
        &self.proofs
    }

    /// Register a password principal and issue its first token pair.
    ///
    /// # Errors
    ///
    /// `InvalidRequest`, `AlreadyRegistered`, or repository and hashing
    /// failures.
    #[instrument(skip_all)]
    pub async fn register(&self, request: RegisterRequest) -> Result<TokenResponse, AuthError> {
        let result = self.register_inner(request).await;
        self.finish(AuditAction::Register, &result, None).await;
        result
    }

    async fn register_inner(&self, request: RegisterRequest) -> Result<TokenResponse, AuthError> {
        let email = request.email.trim().to_lowercase();
        if !is_plausible_email(&email) {
            return Err(AuthError::InvalidRequest("email"));
        }
        if request.password.expose_secret().is_empty() {
            return Err(AuthError::InvalidRequest("password"));
        }
        if self.principals.get_by_email(&email).await?.is_some() {
            return Err(AuthError::AlreadyRegistered);
        }
        if let Some(username) = &request.username {
            if self.principals.get_by_username(username).await?.is_some() {
                return Err(AuthError::AlreadyRegistered);
            }
        }

        let hash = password::hash_password(request.password).await?;
        let mut principal = Principal::with_password(&email, hash);
        principal.username = request.username;
        principal.display_name = request.display_name;
        principal.last_login_at = Some(Utc::now());
        self.principals.upsert(principal.clone()).await?;

        info!(user_id = %principal.id, "principal registered");
        self.respond(&principal)
    }

    /// Password login by email, or by username when the identifier has no
    /// `@`.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown principal or a wrong password.
    #[instrument(skip_all)]
    pub async fn login(&self, identifier: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let result = self.login_inner(identifier, SecretString::from(password)).await;
        self.finish(AuditAction::Login, &result, None).await;
        result
    }

    async fn login_inner(&self, identifier: &str, password: SecretString) -> Result<TokenResponse, AuthError> {
        let identifier = identifier.trim();
        let found = if identifier.contains('@') {
            self.principals.get_by_email(identifier).await?
        } else {
            self.principals.get_by_username(identifier).await?
        };

        let hash = found.as_ref().and_then(|p| p.password_hash.clone());
        if !password::verify_password(password, hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        let mut principal = found.ok_or(AuthError::InvalidCredentials)?;

        principal.last_login_at = Some(Utc::now());
        self.principals.upsert(principal.clone()).await?;
        self.respond(&principal)
    }

    /// Start a federated login.
    ///
    /// # Errors
    ///
    /// `UnconfiguredProvider` or a state store failure.
    pub async fn oauth_authorize_url(
        &self,
        provider: &str,
        redirect_uri: &str,
    ) -> Result<AuthorizationRequest, AuthError> {
        Ok(self
            .federation
            .generate_authorization_url(provider, redirect_uri, None)
            .await?)
    }

    /// Complete a federated login and issue a token pair.
    ///
    /// The principal is found by provider linkage, then by email, and is
    /// created when neither matches. An existing account is linked only when
    /// the provider vouches for the email.
    ///
    /// # Errors
    ///
    /// Federation failures (state, exchange, user info) or
    /// `InvalidCredentials` when an unverified email collides with an
    /// existing account.
    #[instrument(skip_all, fields(provider = %provider))]
    pub async fn oauth_login(
        &self,
        provider: &str,
        code: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<TokenResponse, AuthError> {
        let result = self.oauth_login_inner(provider, code, redirect_uri, state).await;
        self.finish(AuditAction::OAuthLogin, &result, Some(provider)).await;
        result
    }

    async fn oauth_login_inner(
        &self,
        provider: &str,
        code: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<TokenResponse, AuthError> {
        let provider_tokens = self
            .federation
            .exchange_code_for_token(provider, code, redirect_uri, state)
            .await?;
        let raw = self
            .federation
            .get_user_info(provider, &provider_tokens.access_token)
            .await?;
        let identity = self.federation.normalize_user_info(provider, &raw)?;

        let mut principal = self.resolve_federated(&identity).await?;
        principal.last_login_at = Some(Utc::now());
        self.principals.upsert(principal.clone()).await?;
        self.respond(&principal)
    }

    async fn resolve_federated(&self, identity: &FederatedIdentity) -> Result<Principal, AuthError> {
        if let Some(linked) = self
            .principals
            .get_by_provider(&identity.provider, &identity.provider_id)
            .await?
        {
            return Ok(linked);
        }

        if let Some(email) = &identity.email {
            if let Some(mut existing) = self.principals.get_by_email(email).await? {
                let same_link = existing.provider.as_deref() == Some(identity.provider.as_str())
                    && existing.provider_id.as_deref() == Some(identity.provider_id.as_str());
                if !same_link && !identity.verified_email {
                    warn!(user_id = %existing.id, "unverified provider email matches an existing principal");
                    metrics::record_security_event("OAUTH_UNVERIFIED_EMAIL_LINK");
                    return Err(AuthError::InvalidCredentials);
                }
                if existing.provider.is_none() {
                    existing.provider = Some(identity.provider.clone());
                    existing.provider_id = Some(identity.provider_id.clone());
                    info!(user_id = %existing.id, "federated identity linked");
                }
                existing.email_verified |= identity.verified_email;
                if existing.picture.is_none() {
                    existing.picture.clone_from(&identity.picture);
                }
                return Ok(existing);
            }
        }

        let principal = Principal {
            id: uuid::Uuid::new_v4().to_string(),
            email: identity
                .email
                .clone()
                .unwrap_or_else(|| placeholder_email(identity)),
            username: None,
            display_name: identity.name.clone(),
            role: DEFAULT_ROLE.to_string(),
            auth_method: AuthMethod::OAuth(identity.provider.clone()),
            password_hash: None,
            provider: Some(identity.provider.clone()),
            provider_id: Some(identity.provider_id.clone()),
            picture: identity.picture.clone(),
            email_verified: identity.email.is_some() && identity.verified_email,
            created_at: Utc::now(),
            last_login_at: None,
        };
        info!(user_id = %principal.id, "principal created from federated identity");
        Ok(principal)
    }

    /// Rotate a refresh token.
    ///
    /// The presented token is blacklisted before the new pair exists; when
    /// two rotations race, only the one that writes the entry wins.
    ///
    /// # Errors
    ///
    /// Token verification errors, `TokenRevoked` for a blacklisted or
    /// concurrently rotated token, or a store failure under fail-closed.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let result = self.refresh_inner(refresh_token).await;
        self.finish(AuditAction::Refresh, &result, None).await;
        result
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let claims = self.tokens.verify_refresh_token(refresh_token)?;
        if self.registry.is_revoked(&claims.jti).await? {
            return Err(AuthError::TokenRevoked);
        }

        let principal = self
            .principals
            .get_by_id(&claims.user_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let ttl = claims
            .remaining_lifetime(Utc::now().timestamp())
            .unwrap_or(Duration::from_secs(1));
        if !self.registry.revoke_if_absent(&claims.jti, ttl).await? {
            warn!(user_id = %claims.user_id, "refresh token presented twice");
            metrics::record_security_event("REFRESH_TOKEN_REUSE");
            return Err(AuthError::TokenRevoked);
        }

        let pair = self.tokens.issue_pair(&claims.subject())?;
        debug!(user_id = %claims.user_id, "refresh token rotated");
        Ok(TokenResponse::new(pair, principal.public_view()))
    }

    /// Revoke an access token and optionally its refresh token.
    ///
    /// Each id is blacklisted for its own remaining lifetime. Returns
    /// `true` if any entry was written, `false` if every token had already
    /// expired or the store was down under fail-open.
    ///
    /// # Errors
    ///
    /// `TokenMalformed`/`TokenWrongType` for a token that is not authentic,
    /// or a store failure under fail-closed.
    #[instrument(skip_all)]
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<bool, AuthError> {
        let result = self.logout_inner(access_token, refresh_token).await;
        self.finish(AuditAction::Logout, &result, None).await;
        result
    }

    async fn logout_inner(&self, access_token: &str, refresh_token: Option<&str>) -> Result<bool, AuthError> {
        let mut presented = vec![(access_token, TokenKind::Access)];
        if let Some(refresh) = refresh_token {
            presented.push((refresh, TokenKind::Refresh));
        }

        let identities = presented
            .into_iter()
            .map(|(token, kind)| self.tokens.inspect(token, kind))
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now().timestamp();
        let mut revoked = false;
        for identity in identities {
            if let Some(ttl) = identity.remaining_lifetime(now) {
                revoked |= self.registry.revoke(&identity.jti, ttl).await?;
            }
        }
        Ok(revoked)
    }

    /// Verify a token of `kind` and check the blacklist. Any failure,
    /// including a store failure under fail-closed, yields `None`.
    pub async fn verify(&self, token: &str, kind: TokenKind) -> Option<VerifiedToken> {
        let verified = match kind {
            TokenKind::Access => self.verify_typed::<AccessTokenClaims>(token).await,
            TokenKind::Refresh => self.verify_typed::<RefreshTokenClaims>(token).await,
        };
        match verified {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(kind = %e.kind(), "token rejected");
                None
            }
        }
    }

    async fn verify_typed<C: TypedClaims>(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let claims: C = self.tokens.verify_at(token, Utc::now().timestamp())?;
        if self.registry.is_revoked(claims.jti()).await? {
            return Err(AuthError::TokenRevoked);
        }
        Ok(VerifiedToken::from_claims(&claims))
    }

    /// Authenticate a resource request carrying `Authorization: DPoP <token>`
    /// and `DPoP: <proof>`.
    ///
    /// Checks the access token, then the blacklist, then the proof against
    /// `method`, `uri` and the presented token.
    ///
    /// # Errors
    ///
    /// `MissingCredentials` for absent or non-DPoP headers, then token,
    /// revocation and proof errors in check order.
    #[instrument(skip(self, authorization, dpop), fields(method = %method, uri = %uri))]
    pub async fn authenticate_request(
        &self,
        authorization: Option<&str>,
        dpop: Option<&str>,
        method: &str,
        uri: &str,
    ) -> Result<AccessTokenClaims, AuthError> {
        let result = self.authenticate_inner(authorization, dpop, method, uri).await;
        match &result {
            Ok(_) => metrics::record_auth_operation(AuditAction::AuthenticateRequest.as_str(), "success"),
            Err(e) => {
                metrics::record_auth_operation(AuditAction::AuthenticateRequest.as_str(), e.kind().code());
                debug!(kind = %e.kind(), "request rejected");
                audit::emit(
                    &self.audit,
                    AuditEvent::failure(AuditAction::AuthenticateRequest, e.kind()),
                )
                .await;
            }
        }
        result
    }

    async fn authenticate_inner(
        &self,
        authorization: Option<&str>,
        dpop: Option<&str>,
        method: &str,
        uri: &str,
    ) -> Result<AccessTokenClaims, AuthError> {
        let access_token = authorization
            .and_then(parse_dpop_authorization)
            .ok_or(AuthError::MissingCredentials("authorization"))?;
        let proof = dpop
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(AuthError::MissingCredentials("dpop"))?;

        let claims = self.tokens.verify_access_token(access_token)?;
        if self.registry.is_revoked(&claims.jti).await? {
            return Err(AuthError::TokenRevoked);
        }
        self.proofs
            .verify_proof(proof, method, uri, access_token, None, None)
            .await?;
        Ok(claims)
    }

    fn respond(&self, principal: &Principal) -> Result<TokenResponse, AuthError> {
        let pair = self.tokens.issue_pair(&principal.subject())?;
        Ok(TokenResponse::new(pair, principal.public_view()))
    }

    async fn finish<T>(&self, action: AuditAction, result: &Result<T, AuthError>, provider: Option<&str>)
    where
        T: AuditSubject,
    {
        let mut event = match result {
            Ok(value) => {
                metrics::record_auth_operation(action.as_str(), "success");
                AuditEvent::success(action, value.principal_id())
            }
            Err(e) => {
                let kind = e.kind();
                metrics::record_auth_operation(action.as_str(), kind.code());
                if kind == ErrorKind::Internal || kind == ErrorKind::StoreUnavailable {
                    warn!(action = action.as_str(), kind = %kind, error = %e, "operation failed");
                } else {
                    info!(action = action.as_str(), kind = %kind, "operation rejected");
                }
                AuditEvent::failure(action, kind)
            }
        };
        if let Some(provider) = provider {
            event = event.with_provider(provider);
        }
        audit::emit(&self.audit, event).await;
    }
}

/// Principal id an operation result can attribute its audit event to.
trait AuditSubject {
    fn principal_id(&self) -> Option<String>;
}

impl AuditSubject for TokenResponse {
    fn principal_id(&self) -> Option<String> {
        Some(self.user.id.clone())
    }
}

impl AuditSubject for bool {
    fn principal_id(&self) -> Option<String> {
        None
    }
}

/// Token from `DPoP <token>`; the scheme is case-insensitive.
fn parse_dpop_authorization(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(DPOP_SCHEME) && !token.is_empty()).then_some(token)
}

fn is_plausible_email(email: &str) -> bool {
    email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
}

/// Reserved-domain address for providers that return no email.
fn placeholder_email(identity: &FederatedIdentity) -> String {
    format!("{}@{}.oauth.invalid", identity.provider_id, identity.provider)
}
