//! Integration tests for the authorization-code and refresh-token grants
//!
//! Walks grants through their lifecycle: `Issued -> Active -> Refreshed` on
//! rotation, and `Revoked` on reuse, replay or logout.

use chrono::Duration;
use common::secret::ExposeSecret;
use token_service::errors::TokenError;
use token_service::models::{GrantState, RevocationReason, ScopeSet, TokenKind};
use token_service::repositories::RefreshChainStore;
use token_test_utils::*;

// ============================================================================
// Authorization code exchange
// ============================================================================

#[tokio::test]
async fn test_code_exchange_returns_working_pair() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let key = harness.authority.key_store().current_key().await?;

    let pair = harness
        .login(TEST_SUBJECT_ALICE, "stories:read comments:write")
        .await?;

    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 900);
    assert_eq!(pair.scope, "comments:write stories:read");

    pair.access_token
        .assert_valid_jwt()
        .assert_signed_by(&key.key_id)
        .assert_for_subject(TEST_SUBJECT_ALICE)
        .assert_has_scope(SCOPE_STORIES_READ)
        .assert_has_scope(SCOPE_COMMENTS_WRITE)
        .assert_kind("access")
        .assert_lifetime(900)
        .assert_in_chain(&pair.chain_id.to_string());
    pair.refresh_token
        .assert_valid_jwt()
        .assert_kind("refresh")
        .assert_lifetime(14 * 24 * 3600);

    let access = harness.authority.validate(&pair.access_token).await?;
    assert_eq!(access.subject, TEST_SUBJECT_ALICE);
    assert_eq!(access.kind, TokenKind::Access);
    assert_eq!(access.chain_id, Some(pair.chain_id));

    let refresh = harness.authority.validate(&pair.refresh_token).await?;
    let chain = RefreshChainStore::get(harness.store.as_ref(), pair.chain_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chain not stored"))?;
    assert_eq!(chain.version, 0);
    assert_eq!(chain.client_id, TEST_CLIENT_WEB);
    assert_eq!(
        GrantState::of(&chain, refresh.token_id, harness.now()),
        GrantState::Active
    );

    Ok(())
}

#[tokio::test]
async fn test_code_for_ungranted_scope_is_invalid_scope() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    let result = harness
        .authority
        .create_authorization_code(
            TEST_SUBJECT_BOB,
            &ScopeSet::parse("stories:read stories:write"),
            TEST_CLIENT_WEB,
        )
        .await;

    match result {
        Err(TokenError::InvalidScope { missing }) => {
            assert_eq!(missing, vec![SCOPE_STORIES_WRITE.to_string()]);
        }
        other => anyhow::bail!("expected InvalidScope, got {:?}", other.map(|_| ())),
    }
    Ok(())
}

#[tokio::test]
async fn test_code_for_unknown_subject_is_not_found() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    let result = harness
        .authority
        .create_authorization_code(TEST_SUBJECT_UNKNOWN, &ScopeSet::new(), TEST_CLIENT_WEB)
        .await;
    assert!(matches!(result, Err(TokenError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_code_is_single_use_and_replay_revokes_chain() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let grant = harness
        .authority
        .create_authorization_code(
            TEST_SUBJECT_ALICE,
            &ScopeSet::parse(SCOPE_STORIES_READ),
            TEST_CLIENT_WEB,
        )
        .await?;

    let pair = harness
        .authority
        .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
        .await?;
    assert!(harness.authority.validate(&pair.access_token).await.is_ok());

    let replay = harness
        .authority
        .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
        .await;
    assert!(matches!(replay, Err(TokenError::ReuseDetected)));

    // Everything minted from the code is now dead
    assert!(matches!(
        harness.authority.validate(&pair.access_token).await,
        Err(TokenError::Revoked)
    ));
    assert!(matches!(
        harness.authority.refresh(&pair.refresh_token).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}

#[tokio::test]
async fn test_code_expires_after_ttl() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_with(&[("AUTH_CODE_TTL_SECONDS", "30")]).await?;
    let grant = harness
        .authority
        .create_authorization_code(TEST_SUBJECT_ALICE, &ScopeSet::new(), TEST_CLIENT_WEB)
        .await?;
    assert_eq!(grant.expires_at, harness.now() + Duration::seconds(30));

    harness.advance(Duration::seconds(30));
    let result = harness
        .authority
        .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
        .await;
    assert!(matches!(result, Err(TokenError::InvalidGrant(_))));
    Ok(())
}

#[tokio::test]
async fn test_code_bound_to_client() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let grant = harness
        .authority
        .create_authorization_code(TEST_SUBJECT_ALICE, &ScopeSet::new(), TEST_CLIENT_WEB)
        .await?;

    let result = harness
        .authority
        .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_MOBILE)
        .await;
    assert!(matches!(result, Err(TokenError::InvalidGrant(_))));
    Ok(())
}

// ============================================================================
// Refresh rotation
// ============================================================================

#[tokio::test]
async fn test_refresh_rotates_through_generations() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let mut pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let chain_id = pair.chain_id;

    for generation in 1..=3u64 {
        harness.advance(Duration::minutes(10));
        let previous = pair.refresh_token.clone();
        pair = harness.authority.refresh(&previous).await?;

        assert_eq!(pair.chain_id, chain_id);
        pair.refresh_token.assert_in_chain(&chain_id.to_string());
        assert!(harness.authority.validate(&pair.access_token).await.is_ok());

        let chain = RefreshChainStore::get(harness.store.as_ref(), chain_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chain not stored"))?;
        assert_eq!(chain.version, generation);

        // The rotated-away refresh token is revoked in the ledger
        assert!(matches!(
            harness.authority.validate(&previous).await,
            Err(TokenError::Revoked)
        ));
    }
    Ok(())
}

#[tokio::test]
async fn test_refresh_keeps_granted_scopes() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness
        .login(TEST_SUBJECT_ALICE, "stories:read stories:write")
        .await?;

    let rotated = harness.authority.refresh(&pair.refresh_token).await?;
    assert_eq!(rotated.scope, pair.scope);
    rotated
        .access_token
        .assert_has_scope(SCOPE_STORIES_READ)
        .assert_has_scope(SCOPE_STORIES_WRITE);
    Ok(())
}

#[tokio::test]
async fn test_refresh_token_reuse_revokes_whole_chain() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let first = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let second = harness.authority.refresh(&first.refresh_token).await?;
    let third = harness.authority.refresh(&second.refresh_token).await?;

    // An attacker replays the first refresh token
    assert!(matches!(
        harness.authority.refresh(&first.refresh_token).await,
        Err(TokenError::ReuseDetected)
    ));

    let chain = RefreshChainStore::get(harness.store.as_ref(), first.chain_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chain not stored"))?;
    assert!(chain.revoked);
    assert_eq!(chain.revocation_reason, Some(RevocationReason::ReuseDetected));

    // The legitimate holder is logged out too
    for token in [&third.access_token, &third.refresh_token, &second.access_token] {
        assert!(matches!(
            harness.authority.validate(token).await,
            Err(TokenError::Revoked)
        ));
    }
    assert!(matches!(
        harness.authority.refresh(&third.refresh_token).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}

#[tokio::test]
async fn test_refresh_rejects_access_token() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    assert!(matches!(
        harness.authority.refresh(&pair.access_token).await,
        Err(TokenError::InvalidGrant(_))
    ));
    // A rejected attempt does not disturb the chain
    assert!(harness.authority.refresh(&pair.refresh_token).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_refresh_after_chain_expiry_is_expired() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_with(&[("REFRESH_TOKEN_TTL_SECONDS", "3600")]).await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    harness.advance(Duration::hours(1));
    assert!(matches!(
        harness.authority.refresh(&pair.refresh_token).await,
        Err(TokenError::Expired)
    ));
    Ok(())
}

// ============================================================================
// Logout
// ============================================================================

#[tokio::test]
async fn test_logout_revokes_chain_and_outstanding_access_tokens() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let first = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let second = harness.authority.refresh(&first.refresh_token).await?;

    let revoked = harness.authority.logout(&second.refresh_token).await?;
    assert!(revoked >= 3, "chain entry plus outstanding tokens, got {revoked}");

    for token in [&first.access_token, &second.access_token, &second.refresh_token] {
        assert!(matches!(
            harness.authority.validate(token).await,
            Err(TokenError::Revoked)
        ));
    }

    // Idempotent
    assert_eq!(harness.authority.logout(&second.refresh_token).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_logout_subject_leaves_other_subjects_alone() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let alice_web = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let alice_other = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_WRITE).await?;
    let bob = harness.login(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

    assert!(harness.authority.logout_subject(TEST_SUBJECT_ALICE).await? > 0);

    for pair in [&alice_web, &alice_other] {
        assert!(matches!(
            harness.authority.validate(&pair.access_token).await,
            Err(TokenError::Revoked)
        ));
    }
    assert!(harness.authority.validate(&bob.access_token).await.is_ok());
    assert!(harness.authority.refresh(&bob.refresh_token).await.is_ok());
    Ok(())
}
