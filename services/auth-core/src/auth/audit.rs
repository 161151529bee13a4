//! Audit events emitted by the orchestrator.

use crate::error::ErrorKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound on a single sink call.
pub const AUDIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Audited orchestrator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Password registration
    Register,
    /// Password login
    Login,
    /// Federated login
    #[serde(rename = "oauth_login")]
    OAuthLogin,
    /// Refresh rotation
    Refresh,
    /// Logout
    Logout,
    /// Proof-bound request authentication
    AuthenticateRequest,
}

impl AuditAction {
    /// Stable name used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::OAuthLogin => "oauth_login",
            Self::Refresh => "refresh",
            Self::Logout => "logout",
            Self::AuthenticateRequest => "authenticate_request",
        }
    }
}

/// One audit record. Never carries tokens or passwords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Operation
    pub action: AuditAction,
    /// Whether the operation succeeded
    pub success: bool,
    /// Principal id, when known
    pub principal_id: Option<String>,
    /// Federation provider, for federated logins
    pub provider: Option<String>,
    /// Failure classification
    pub error_kind: Option<&'static str>,
    /// Emission time
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Successful operation.
    #[must_use]
    pub fn success(action: AuditAction, principal_id: Option<String>) -> Self {
        Self {
            action,
            success: true,
            principal_id,
            provider: None,
            error_kind: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed operation.
    #[must_use]
    pub fn failure(action: AuditAction, kind: ErrorKind) -> Self {
        Self {
            action,
            success: false,
            principal_id: None,
            provider: None,
            error_kind: Some(kind.code()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the federation provider.
    #[must_use]
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }
}

/// Sink failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("audit sink: {0}")]
pub struct AuditError(pub String);

/// Destination for audit events, owned outside the core.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist or forward one event.
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Sink writing events to the `audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(
            target: "audit",
            action = event.action.as_str(),
            success = event.success,
            principal_id = ?event.principal_id,
            provider = ?event.provider,
            error_kind = ?event.error_kind,
            "audit event"
        );
        Ok(())
    }
}

/// Deliver an event, bounded by [`AUDIT_TIMEOUT`]. Failures are logged and
/// swallowed.
pub(crate) async fn emit(sink: &Arc<dyn AuditSink>, event: AuditEvent) {
    match tokio::time::timeout(AUDIT_TIMEOUT, sink.record(&event)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(action = event.action.as_str(), error = %e, "audit sink failed"),
        Err(_) => warn!(action = event.action.as_str(), "audit sink timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            Err(AuditError("down".into()))
        }
    }

    struct SlowSink;

    #[async_trait]
    impl AuditSink for SlowSink {
        async fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let failing: Arc<dyn AuditSink> = Arc::new(FailingSink);
        emit(&failing, AuditEvent::success(AuditAction::Login, Some("1".into()))).await;
    }

    #[tokio::test]
    async fn test_slow_sink_is_bounded() {
        let slow: Arc<dyn AuditSink> = Arc::new(SlowSink);
        let started = tokio::time::Instant::now();
        emit(&slow, AuditEvent::failure(AuditAction::Refresh, ErrorKind::TokenRevoked)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_failure_event_carries_code() {
        let event = AuditEvent::failure(AuditAction::OAuthLogin, ErrorKind::StateInvalid).with_provider("github");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "oauth_login");
        assert_eq!(json["error_kind"], "STATE_INVALID");
        assert_eq!(json["provider"], "github");
    }
}
