//! Persistence failures seen through the token authority
//!
//! Every persistence call gets one retry. A second failure surfaces as
//! `PersistenceUnavailable` and must leave no half-applied state behind.

use chrono::Duration;
use common::secret::ExposeSecret;
use token_service::errors::TokenError;
use token_service::models::{RevocationReason, ScopeSet, TokenKind};
use token_service::repositories::RefreshChainStore;
use token_test_utils::*;

#[tokio::test]
async fn test_single_failure_is_absorbed_by_retry() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    harness.store.fail_next("tokens.record", 1);

    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    assert_eq!(harness.store.injected(), 1);
    assert!(harness.authority.validate(&issued.encoded).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_second_failure_is_persistence_unavailable() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    harness.store.fail_next("tokens.record", 2);

    let result = harness
        .authority
        .issue(
            TEST_SUBJECT_BOB,
            &ScopeSet::parse(SCOPE_STORIES_READ),
            TokenKind::Access,
            harness.config.access_token_ttl,
        )
        .await;
    assert!(matches!(result, Err(TokenError::PersistenceUnavailable(_))));
    assert_eq!(harness.store.injected(), 2);

    // Next request is unaffected
    harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stalled_call_times_out_and_retries() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[("PERSISTENCE_TIMEOUT_MS", "50")]).await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

    harness.store.stall_next("revocations.contains", 1);
    assert!(harness.authority.validate(&issued.encoded).await.is_ok());

    harness.store.stall_next("revocations.contains", 2);
    assert!(matches!(
        harness.authority.validate(&issued.encoded).await,
        Err(TokenError::PersistenceUnavailable(_))
    ));
    assert_eq!(harness.store.injected(), 3);
    Ok(())
}

#[tokio::test]
async fn test_ledger_outage_fails_closed() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

    harness.store.fail_next("revocations.contains", 2);
    assert!(matches!(
        harness.authority.validate(&issued.encoded).await,
        Err(TokenError::PersistenceUnavailable(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_revocation_is_reported_and_can_be_retried() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

    harness.store.fail_next("revocations.insert", 2);
    assert!(matches!(
        harness
            .authority
            .revoke(issued.token.token_id, RevocationReason::Explicit)
            .await,
        Err(TokenError::PersistenceUnavailable(_))
    ));
    // Not silently revoked, not silently dropped: the caller saw the error
    assert!(harness.authority.validate(&issued.encoded).await.is_ok());

    assert!(
        harness
            .authority
            .revoke(issued.token.token_id, RevocationReason::Explicit)
            .await?
    );
    assert!(matches!(
        harness.authority.validate(&issued.encoded).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lost_consume_ack_does_not_burn_the_code() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[("PERSISTENCE_TIMEOUT_MS", "100")]).await?;
    let grant = harness
        .authority
        .create_authorization_code(
            TEST_SUBJECT_ALICE,
            &ScopeSet::parse(SCOPE_STORIES_READ),
            TEST_CLIENT_WEB,
        )
        .await?;

    // The consume lands, but its acknowledgement never arrives and the call is retried
    harness.store.lose_ack_next("codes.consume", 1);
    let pair = harness
        .authority
        .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
        .await?;
    assert_eq!(harness.store.injected(), 1);
    assert!(harness.authority.validate(&pair.access_token).await.is_ok());

    let chain = RefreshChainStore::get(harness.store.as_ref(), pair.chain_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chain missing"))?;
    assert!(!chain.revoked);

    // A genuine second presentation is still a replay
    assert!(matches!(
        harness
            .authority
            .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
            .await,
        Err(TokenError::ReuseDetected)
    ));
    Ok(())
}

#[tokio::test]
async fn test_failed_swap_leaves_chain_refreshable() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    harness.store.fail_next("chains.compare_and_swap", 2);
    assert!(matches!(
        harness.authority.refresh(&pair.refresh_token).await,
        Err(TokenError::PersistenceUnavailable(_))
    ));

    let chain = RefreshChainStore::get(harness.store.as_ref(), pair.chain_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chain missing"))?;
    assert_eq!(chain.version, 0);
    assert!(!chain.revoked);

    // The presented token is still the live one
    let rotated = harness.authority.refresh(&pair.refresh_token).await?;
    assert_eq!(rotated.chain_id, pair.chain_id);
    Ok(())
}

#[tokio::test]
async fn test_failed_key_rotation_keeps_current_key() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[]).await?;
    let before = harness.authority.key_store().current_key().await?;

    harness.store.fail_next("keys.insert", 2);
    assert!(matches!(
        harness.authority.rotate_key().await,
        Err(TokenError::PersistenceUnavailable(_))
    ));
    assert_eq!(
        harness.authority.key_store().current_key().await?.key_id,
        before.key_id
    );
    harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    Ok(())
}

#[tokio::test]
async fn test_sweep_failure_is_retried_next_pass() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_flaky(&[("ACCESS_TOKEN_TTL_SECONDS", "60")]).await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    harness
        .authority
        .revoke(issued.token.token_id, RevocationReason::Explicit)
        .await?;
    harness.advance(Duration::minutes(5));

    harness.store.fail_next("revocations.sweep", 2);
    assert!(matches!(
        harness.authority.sweep(harness.now()).await,
        Err(TokenError::PersistenceUnavailable(_))
    ));

    let report = harness.authority.sweep(harness.now()).await?;
    assert_eq!(report.revocations, 1);
    assert_eq!(report.tokens, 1);
    Ok(())
}
