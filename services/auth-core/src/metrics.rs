//! Prometheus metrics for the authentication core.
//!
//! Provides counters and gauges for observability.

use once_cell::sync::Lazy;
use prometheus::{register_counter_vec, register_int_gauge_vec, CounterVec, IntGaugeVec};

/// Tokens issued counter.
pub static TOKENS_ISSUED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_tokens_issued_total",
        "Total number of tokens issued",
        &["token_type", "strategy"]
    )
    .expect("Failed to register tokens_issued metric")
});

/// Token verifications counter.
pub static TOKEN_VERIFICATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_token_verifications_total",
        "Total number of token verifications",
        &["token_type", "result"]
    )
    .expect("Failed to register token_verifications metric")
});

/// Proof validations counter.
pub static PROOF_VALIDATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_proof_validations_total",
        "Total number of proof-of-possession validations",
        &["result"]
    )
    .expect("Failed to register proof_validations metric")
});

/// Revocation store operations counter.
pub static REVOCATION_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_revocation_operations_total",
        "Total number of revocation store operations",
        &["operation", "status"]
    )
    .expect("Failed to register revocation_operations metric")
});

/// Degraded revocation decisions counter.
pub static REVOCATION_DEGRADED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_revocation_degraded_total",
        "Revocation checks answered permissively while the store was unavailable",
        &["operation"]
    )
    .expect("Failed to register revocation_degraded metric")
});

/// Active key strategy gauge.
pub static KEY_STRATEGY: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "auth_core_key_strategy",
        "Key strategy in use (1 = active)",
        &["strategy"]
    )
    .expect("Failed to register key_strategy metric")
});

/// Authentication operations counter.
pub static AUTH_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_operations_total",
        "Total number of orchestrated authentication operations",
        &["operation", "result"]
    )
    .expect("Failed to register auth_operations metric")
});

/// OAuth provider requests counter.
pub static PROVIDER_REQUESTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_provider_requests_total",
        "Total number of OAuth provider requests",
        &["provider", "operation", "status"]
    )
    .expect("Failed to register provider_requests metric")
});

/// Security events counter.
pub static SECURITY_EVENTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "auth_core_security_events_total",
        "Total number of security events",
        &["event_type"]
    )
    .expect("Failed to register security_events metric")
});

/// Record a token issuance.
pub fn record_token_issued(token_type: &str, strategy: &str) {
    TOKENS_ISSUED.with_label_values(&[token_type, strategy]).inc();
}

/// Record a token verification outcome.
pub fn record_token_verification(token_type: &str, result: &str) {
    TOKEN_VERIFICATIONS
        .with_label_values(&[token_type, result])
        .inc();
}

/// Record a proof validation outcome.
pub fn record_proof_validation(result: &str) {
    PROOF_VALIDATIONS.with_label_values(&[result]).inc();
}

/// Record a revocation store operation.
pub fn record_revocation_operation(operation: &str, status: &str) {
    REVOCATION_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

/// Record a fail-open decision.
pub fn record_revocation_degraded(operation: &str) {
    REVOCATION_DEGRADED.with_label_values(&[operation]).inc();
}

/// Serializes unit tests that set or read the key strategy gauge.
#[cfg(test)]
pub(crate) static KEY_STRATEGY_TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Mark `active` as the only active key strategy.
pub fn set_key_strategy(active: &str) {
    for strategy in ["configured", "ephemeral", "fallback"] {
        KEY_STRATEGY
            .with_label_values(&[strategy])
            .set(i64::from(strategy == active));
    }
}

/// Record an orchestrated operation.
pub fn record_auth_operation(operation: &str, result: &str) {
    AUTH_OPERATIONS.with_label_values(&[operation, result]).inc();
}

/// Record an OAuth provider request.
pub fn record_provider_request(provider: &str, operation: &str, status: &str) {
    PROVIDER_REQUESTS
        .with_label_values(&[provider, operation, status])
        .inc();
}

/// Record a security event.
pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}
