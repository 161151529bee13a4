//! Property-based tests for proof-of-possession.
//!
//! Property 5: A proof is accepted once and replayed afterwards
//! Property 6: A proof is bound to method, URI and access token
//! Property 7: Nonces are single-use

use auth_core::config::{RevocationFailurePolicy, TokenPolicy};
use auth_core::crypto::KeyStrategy;
use auth_core::dpop::{compute_ath, ProofError, ProofOfPossessionService};
use auth_core::store::{MemoryRevocationStore, RevocationRegistry};
use auth_core::token::TokenService;
use proptest::prelude::*;
use std::sync::Arc;

fn service() -> ProofOfPossessionService {
    let tokens = Arc::new(TokenService::new(
        Arc::new(KeyStrategy::generate().unwrap()),
        TokenPolicy::default(),
    ));
    let registry = Arc::new(RevocationRegistry::new(
        Arc::new(MemoryRevocationStore::new()),
        RevocationFailurePolicy::FailClosed,
    ));
    ProofOfPossessionService::new(tokens, registry)
}

/// Generate arbitrary HTTP methods.
fn arb_http_method() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("GET".to_string()),
        Just("POST".to_string()),
        Just("PUT".to_string()),
        Just("DELETE".to_string()),
        Just("PATCH".to_string()),
    ]
}

/// Generate arbitrary HTTP URIs.
fn arb_http_uri() -> impl Strategy<Value = String> {
    "[a-z]{3,10}(/[a-z0-9]{1,8}){0,3}".prop_map(|path| format!("https://api.example.com/{path}"))
}

/// Generate arbitrary access token strings.
fn arb_access_token() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_-]{20,80}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property 5: The first verification succeeds and the same proof is
    /// then a replay.
    #[test]
    fn prop_single_use(method in arb_http_method(), uri in arb_http_uri(), token in arb_access_token()) {
        let service = service();
        let proof = service.create_proof(&method, &uri, &token, None).unwrap();

        tokio_test::block_on(async {
            let first = service.verify_proof(&proof, &method, &uri, &token, None, None).await;
            prop_assert!(first.is_ok(), "got {:?}", first);
            let second = service.verify_proof(&proof, &method, &uri, &token, None, None).await;
            prop_assert!(matches!(second, Err(ProofError::ProofReplayed)), "got {:?}", second);
            Ok(())
        })?;
    }

    /// Property 6: Any differing method, URI or bound token is a mismatch.
    #[test]
    fn prop_bound_to_request(
        method in arb_http_method(),
        other_method in arb_http_method(),
        uri in arb_http_uri(),
        other_uri in arb_http_uri(),
        token in arb_access_token(),
        other_token in arb_access_token(),
    ) {
        let service = service();

        tokio_test::block_on(async {
            if other_method != method {
                let proof = service.create_proof(&method, &uri, &token, None).unwrap();
                let result = service.verify_proof(&proof, &other_method, &uri, &token, None, None).await;
                prop_assert!(matches!(result, Err(ProofError::MethodMismatch { .. })), "got {:?}", result);
            }
            if other_uri != uri {
                let proof = service.create_proof(&method, &uri, &token, None).unwrap();
                let result = service.verify_proof(&proof, &method, &other_uri, &token, None, None).await;
                prop_assert!(matches!(result, Err(ProofError::UriMismatch { .. })), "got {:?}", result);
            }
            if other_token != token {
                let proof = service.create_proof(&method, &uri, &token, None).unwrap();
                let result = service.verify_proof(&proof, &method, &uri, &other_token, None, None).await;
                prop_assert!(matches!(result, Err(ProofError::TokenBindingMismatch)), "got {:?}", result);
            }
            Ok(())
        })?;
    }

    /// The access token hash is deterministic and unpadded base64url.
    #[test]
    fn prop_ath_deterministic(token in arb_access_token()) {
        let ath = compute_ath(&token);
        prop_assert_eq!(&ath, &compute_ath(&token));
        prop_assert_eq!(ath.len(), 43);
        prop_assert!(!ath.contains('=') && !ath.contains('+') && !ath.contains('/'));
    }
}

/// Property 7: A nonce is consumed by the first proof that carries it.
#[tokio::test]
async fn test_nonce_single_use_across_proofs() {
    let service = service();
    let uri = "https://api.example.com/orders";
    let nonce = service.generate_nonce(Some("client-a")).await.unwrap();

    let first = service.create_proof("POST", uri, "token", Some(&nonce)).unwrap();
    service
        .verify_proof(&first, "POST", uri, "token", None, Some(&nonce))
        .await
        .unwrap();

    let second = service.create_proof("POST", uri, "token", Some(&nonce)).unwrap();
    let result = service.verify_proof(&second, "POST", uri, "token", None, Some(&nonce)).await;
    assert!(matches!(result, Err(ProofError::InvalidNonce)));
}

#[tokio::test]
async fn test_nonce_mismatch_rejected() {
    let service = service();
    let uri = "https://api.example.com/orders";
    let issued = service.generate_nonce(None).await.unwrap();
    let other = service.generate_nonce(None).await.unwrap();

    let proof = service.create_proof("GET", uri, "token", Some(&other)).unwrap();
    let result = service.verify_proof(&proof, "GET", uri, "token", None, Some(&issued)).await;
    assert!(matches!(result, Err(ProofError::InvalidNonce)));
}

#[tokio::test]
async fn test_concurrent_verification_has_one_winner() {
    let service = Arc::new(service());
    let uri = "https://api.example.com/pay";
    let proof = service.create_proof("POST", uri, "token", None).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let proof = proof.clone();
        handles.push(tokio::spawn(async move {
            service.verify_proof(&proof, "POST", uri, "token", None, None).await.is_ok()
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
}
