//! Property-based tests for token issuance and verification.
//!
//! Property 1: Claims round trip through access and refresh envelopes
//! Property 2: Token kinds are never interchangeable
//! Property 3: Any change to an envelope body is rejected
//! Property 4: The fallback strategy keeps the same contract

use auth_core::config::TokenPolicy;
use auth_core::crypto::{FallbackSigner, KeyStrategy};
use auth_core::token::{TokenError, TokenKind, TokenService, TokenSubject};
use once_cell::sync::Lazy;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

static SERVICE: Lazy<TokenService> = Lazy::new(|| {
    TokenService::new(Arc::new(KeyStrategy::generate().unwrap()), TokenPolicy::default())
});

static FALLBACK: Lazy<TokenService> = Lazy::new(|| {
    TokenService::new(
        Arc::new(KeyStrategy::Fallback(FallbackSigner::ephemeral())),
        TokenPolicy::default(),
    )
});

/// Generate arbitrary token subjects.
fn arb_subject() -> impl Strategy<Value = TokenSubject> {
    (
        "[a-z0-9._]{1,20}@[a-z]{2,10}\\.(com|org|io)",
        "[a-f0-9-]{8,36}",
        prop_oneof![Just("user"), Just("admin"), Just("owner")],
    )
        .prop_map(|(sub, user_id, role)| TokenSubject::new(sub, user_id, role))
}

/// Generate access token lifetimes within the policy maximum.
fn arb_ttl() -> impl Strategy<Value = Duration> {
    (1u64..=1800).prop_map(Duration::from_secs)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property 1: Verifying a freshly issued access token returns the
    /// subject it was issued for.
    #[test]
    fn prop_access_round_trip(subject in arb_subject(), ttl in arb_ttl()) {
        let token = SERVICE.create_access_token(&subject, ttl).unwrap();
        prop_assert!(token.starts_with("v1.public."));

        let claims = SERVICE.verify_access_token(&token).unwrap();
        prop_assert_eq!(&claims.sub, &subject.sub);
        prop_assert_eq!(&claims.user_id, &subject.user_id);
        prop_assert_eq!(&claims.role, &subject.role);
        prop_assert_eq!(claims.exp - claims.iat, i64::try_from(ttl.as_secs()).unwrap());
        prop_assert_eq!(SERVICE.get_token_id(&token, TokenKind::Access).unwrap(), claims.jti);
    }

    /// Property 1: Refresh tokens are encrypted and round trip.
    #[test]
    fn prop_refresh_round_trip(subject in arb_subject()) {
        let token = SERVICE
            .create_refresh_token(&subject, Duration::from_secs(86_400))
            .unwrap();
        prop_assert!(token.starts_with("v1.local."));
        prop_assert!(!token.contains(&subject.sub));

        let claims = SERVICE.verify_refresh_token(&token).unwrap();
        prop_assert_eq!(&claims.sub, &subject.sub);
        prop_assert_eq!(claims.token_type, TokenKind::Refresh);
    }

    /// Property 2: Access and refresh tokens never verify as each other.
    #[test]
    fn prop_kinds_not_interchangeable(subject in arb_subject()) {
        let pair = SERVICE.issue_pair(&subject).unwrap();

        let as_refresh = SERVICE.verify_refresh_token(&pair.access_token);
        prop_assert!(matches!(as_refresh, Err(TokenError::WrongType { .. })), "got {:?}", as_refresh);
        let as_access = SERVICE.verify_access_token(&pair.refresh_token);
        prop_assert!(matches!(as_access, Err(TokenError::WrongType { .. })), "got {:?}", as_access);
    }

    /// Property 3: Replacing one character of the body breaks verification.
    #[test]
    fn prop_tampered_body_rejected(subject in arb_subject(), position in 0.0f64..1.0) {
        let token = SERVICE.create_access_token(&subject, Duration::from_secs(60)).unwrap();
        let body_start = "v1.public.".len();
        let body_end = token.rfind('.').unwrap();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let index = body_start + ((body_end - body_start - 1) as f64 * position) as usize;

        let mut bytes = token.into_bytes();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let result = SERVICE.verify_access_token(&tampered);
        prop_assert!(matches!(result, Err(TokenError::Malformed(_))), "got {:?}", result);
    }

    /// Property 4: The HMAC fallback issues tokens with the same claims and
    /// the same type checks.
    #[test]
    fn prop_fallback_contract(subject in arb_subject()) {
        let pair = FALLBACK.issue_pair(&subject).unwrap();

        let access = FALLBACK.verify_access_token(&pair.access_token).unwrap();
        prop_assert_eq!(&access.sub, &subject.sub);
        let refresh = FALLBACK.verify_refresh_token(&pair.refresh_token).unwrap();
        prop_assert_eq!(&refresh.user_id, &subject.user_id);
        let as_access = FALLBACK.verify_access_token(&pair.refresh_token);
        prop_assert!(matches!(as_access, Err(TokenError::WrongType { .. })), "got {:?}", as_access);
    }
}

#[test]
fn test_fallback_and_envelope_tokens_do_not_cross() {
    let subject = TokenSubject::new("u@x.com", "1", "user");
    let envelope = SERVICE.create_access_token(&subject, Duration::from_secs(60)).unwrap();
    let jwt = FALLBACK.create_access_token(&subject, Duration::from_secs(60)).unwrap();

    assert!(matches!(FALLBACK.verify_access_token(&envelope), Err(TokenError::Malformed(_))));
    assert!(matches!(SERVICE.verify_access_token(&jwt), Err(TokenError::Malformed(_))));
}

#[test]
fn test_issue_pair_uses_policy_lifetime() {
    let pair = SERVICE
        .issue_pair(&TokenSubject::new("u@x.com", "1", "user"))
        .unwrap();
    assert_eq!(pair.expires_in, 1800);
}

#[test]
fn test_access_ttl_above_maximum_is_clamped() {
    let token = SERVICE
        .create_access_token(&TokenSubject::new("u@x.com", "1", "user"), Duration::from_secs(7200))
        .unwrap();
    let claims = SERVICE.verify_access_token(&token).unwrap();
    assert_eq!(claims.exp - claims.iat, 1800);
}
