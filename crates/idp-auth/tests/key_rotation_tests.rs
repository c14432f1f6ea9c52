//! Key rotation and JWKS refresh integration tests.
//!
//! Covers the unknown-`kid` refresh path: rotated keys become usable without
//! a restart, refreshes are rate-limited, and a failing refresh never
//! replaces the key set in use.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use idp_auth::auth::{KeySetError, RefreshOutcome, TokenError};
use idp_test_utils::*;
use serde_json::json;
use std::collections::HashMap;

fn refresh_interval(seconds: &str) -> HashMap<String, String> {
    HashMap::from([("JWKS_MIN_REFRESH_SECONDS".to_string(), seconds.to_string())])
}

// ============================================================================
// Rotation
// ============================================================================

#[tokio::test]
async fn test_rotated_key_is_picked_up_on_unknown_kid() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("0")).await?;
    let verifier = &server.state().verifier;

    idp.publish_keys(&[(PRIMARY_KID, &PRIMARY_KEY), (SECONDARY_KID, &SECONDARY_KEY)]);

    let token = SECONDARY_KEY.sign(SECONDARY_KID, &idp.token_builder().build());
    let verified = verifier.verify(&token, TEST_API_AUDIENCE).await;

    assert!(verified.is_ok(), "rotated key should verify: {:?}", verified.err());
    assert_eq!(idp.jwks_requests().await, 2);
    assert_eq!(verifier.jwks().current().await.len(), 2);

    // Tokens signed with the old key still verify
    let old = idp.sign(&idp.token_builder().build());
    assert!(verifier.verify(&old, TEST_API_AUDIENCE).await.is_ok());
    assert_eq!(idp.jwks_requests().await, 2);

    Ok(())
}

#[tokio::test]
async fn test_retired_key_stops_verifying_after_refresh() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("0")).await?;
    let verifier = &server.state().verifier;

    idp.publish_keys(&[(SECONDARY_KID, &SECONDARY_KEY)]);
    verifier.jwks().force_refresh().await?;

    let old = idp.sign(&idp.token_builder().build());
    let result = verifier.verify(&old, TEST_API_AUDIENCE).await;

    assert_eq!(
        result.unwrap_err(),
        TokenError::KeyNotFound(PRIMARY_KID.to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_still_missing_after_refresh() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("0")).await?;

    let token = SECONDARY_KEY.sign("never-published", &idp.token_builder().build());
    let result = server
        .state()
        .verifier
        .verify(&token, TEST_API_AUDIENCE)
        .await;

    assert_eq!(
        result.unwrap_err(),
        TokenError::KeyNotFound("never-published".to_string())
    );
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_refresh_is_rate_limited() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("60")).await?;
    let verifier = &server.state().verifier;

    for i in 0..5 {
        let token = SECONDARY_KEY.sign(&format!("forged-{}", i), &idp.token_builder().build());
        let result = verifier.verify(&token, TEST_API_AUDIENCE).await;
        assert!(matches!(result, Err(TokenError::KeyNotFound(_))));
    }

    // Startup fetch plus exactly one refresh
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_unknown_kids_collapse_into_one_refresh() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("60")).await?;
    let verifier = &server.state().verifier;

    let tokens: Vec<String> = (0..10)
        .map(|i| SECONDARY_KEY.sign(&format!("forged-{}", i), &idp.token_builder().build()))
        .collect();

    let results =
        futures::future::join_all(tokens.iter().map(|t| verifier.verify(t, TEST_API_AUDIENCE)))
            .await;

    assert!(results.iter().all(Result::is_err));
    assert_eq!(idp.jwks_requests().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_explicit_refresh_reports_skip() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("60")).await?;
    let jwks = server.state().verifier.jwks();

    assert_eq!(jwks.refresh().await?, RefreshOutcome::Refreshed);
    assert_eq!(jwks.refresh().await?, RefreshOutcome::Skipped);
    assert_eq!(idp.jwks_requests().await, 2);

    jwks.force_refresh().await?;
    assert_eq!(idp.jwks_requests().await, 3);

    Ok(())
}

// ============================================================================
// Refresh failures
// ============================================================================

#[tokio::test]
async fn test_failed_refresh_keeps_current_key_set() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn_with_vars(&idp, refresh_interval("0")).await?;
    let verifier = &server.state().verifier;

    idp.publish_jwks(json!({"keys": [{"kty": "RSA", "kid": "broken"}]}));

    let unknown = SECONDARY_KEY.sign(SECONDARY_KID, &idp.token_builder().build());
    let result = verifier.verify(&unknown, TEST_API_AUDIENCE).await;
    assert!(
        matches!(
            result,
            Err(TokenError::KeySetUnavailable(KeySetError::MalformedKeySet(_)))
        ),
        "unexpected result: {:?}",
        result
    );

    // The previous key set is still in use
    let known = idp.sign(&idp.token_builder().build());
    assert!(verifier.verify(&known, TEST_API_AUDIENCE).await.is_ok());
    assert_eq!(verifier.jwks().current().await.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_refresh_reports_malformed_key_set() -> Result<()> {
    let idp = MockIdentityProvider::start().await;
    let server = TestAuthServer::spawn(&idp).await?;

    idp.publish_jwks(json!({"keys": []}));

    let result = server.state().verifier.jwks().force_refresh().await;
    assert!(matches!(result, Err(KeySetError::MalformedKeySet(_))));

    Ok(())
}
