//! Integration tests for signing-key rotation
//!
//! Tokens are verified against the key named by their `kid`, so rotation
//! never invalidates a token before its signing key's `not_after`.

use chrono::Duration;
use std::sync::Arc;
use token_service::errors::TokenError;
use token_service::repositories::SigningKeyStore;
use token_service::services::key_store::KeyStore;
use token_service::tasks::key_rotation::run_key_rotation;
use token_test_utils::*;

#[tokio::test]
async fn test_tokens_survive_rotation() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let k1 = harness.authority.key_store().current_key().await?;
    let before = harness.issue_access(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    let k2 = harness.authority.rotate_key().await?;
    assert_ne!(k1.key_id, k2.key_id);

    let after = harness.issue_access(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    before.encoded.assert_signed_by(&k1.key_id);
    after.encoded.assert_signed_by(&k2.key_id);

    assert_eq!(harness.authority.validate(&before.encoded).await?, before.token);
    assert_eq!(harness.authority.validate(&after.encoded).await?, after.token);
    Ok(())
}

#[tokio::test]
async fn test_refresh_chain_spans_rotation() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    harness.advance(Duration::days(7));
    let k2 = harness.authority.rotate_key().await?;

    let rotated = harness.authority.refresh(&pair.refresh_token).await?;
    rotated.access_token.assert_signed_by(&k2.key_id);
    rotated.refresh_token.assert_signed_by(&k2.key_id);
    Ok(())
}

#[tokio::test]
async fn test_jwks_lists_keys_in_overlap() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let k1 = harness.authority.key_store().current_key().await?;
    harness.advance(Duration::days(7));
    let k2 = harness.authority.rotate_key().await?;

    let jwks = harness.authority.jwks().await?;
    let kids: Vec<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
    assert!(kids.contains(&k1.key_id.as_str()));
    assert!(kids.contains(&k2.key_id.as_str()));
    assert!(jwks
        .keys
        .iter()
        .all(|k| k.kty == "OKP" && k.crv == "Ed25519" && k.alg == "EdDSA"));

    // Past k1's not_after only k2 remains
    harness.advance(Duration::days(24));
    let jwks = harness.authority.jwks().await?;
    let kids: Vec<&str> = jwks.keys.iter().map(|k| k.kid.as_str()).collect();
    assert_eq!(kids, vec![k2.key_id.as_str()]);
    Ok(())
}

#[tokio::test]
async fn test_key_rotated_by_another_instance_is_found_after_reload() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    // A second authority process sharing the same store
    let other = KeyStore::new(
        &harness.config,
        Arc::clone(&harness.store) as Arc<dyn SigningKeyStore>,
        harness.clock.clone(),
    );
    let foreign = other.rotate().await?;

    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    issued.encoded.assert_signed_by(&foreign.key_id);
    assert!(harness.authority.validate(&issued.encoded).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_seeded_foreign_key_verifies_tokens() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let now = harness.now();
    let record = test_signing_key_record(7, TEST_KEY_ID_1, now, now + Duration::days(30))?;
    SigningKeyStore::insert(harness.store.as_ref(), record).await?;

    let claims = TestClaimsBuilder::new(now)
        .for_subject(TEST_SUBJECT_ALICE)
        .with_scope(SCOPE_STORIES_READ)
        .build();
    let raw = sign_with_test_key(&claims, 7, TEST_KEY_ID_1)?;
    let token = harness.authority.validate(&raw).await?;
    assert_eq!(token.key_id, TEST_KEY_ID_1);

    // Same kid, different private key
    let forged = sign_with_test_key(&claims, 8, TEST_KEY_ID_1)?;
    assert!(matches!(
        harness.authority.validate(&forged).await,
        Err(TokenError::BadSignature)
    ));
    Ok(())
}

#[tokio::test]
async fn test_scheduled_rotation_and_prune() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let keys = harness.authority.key_store();
    let k1 = keys.current_key().await?;

    run_key_rotation(keys).await;
    assert_eq!(keys.current_key().await?.key_id, k1.key_id);

    harness.advance(Duration::days(7));
    run_key_rotation(keys).await;
    let k2 = keys.current_key().await?;
    assert_ne!(k2.key_id, k1.key_id);

    harness.advance(Duration::days(23));
    run_key_rotation(keys).await;
    assert!(matches!(
        keys.key_by_id(&k1.key_id).await,
        Err(TokenError::NotFound(_))
    ));
    assert!(keys.key_by_id(&k2.key_id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_token_expiry_capped_by_key_lifetime() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let key = harness.authority.key_store().current_key().await?;

    harness.clock.set(key.not_after - Duration::minutes(5));
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    assert_eq!(issued.token.key_id, key.key_id);
    assert_eq!(issued.token.expires_at, key.not_after);
    assert!(harness.authority.validate(&issued.encoded).await.is_ok());
    Ok(())
}
