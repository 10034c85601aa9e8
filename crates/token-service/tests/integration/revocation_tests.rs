//! Integration tests for revocation and ledger sweeping

use chrono::Duration;
use token_service::errors::TokenError;
use token_service::models::{RevocationReason, RevocationTarget};
use token_service::repositories::RevocationStore;
use token_service::tasks::ledger_sweep::run_ledger_sweep;
use token_test_utils::*;

#[tokio::test]
async fn test_revoked_token_fails_validation() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

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

    // Second revocation is a no-op
    assert!(
        !harness
            .authority
            .revoke(issued.token.token_id, RevocationReason::Explicit)
            .await?
    );
    Ok(())
}

#[tokio::test]
async fn test_revoke_unknown_token_is_not_found() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    assert!(matches!(
        harness
            .authority
            .revoke(TEST_TOKEN_ID_1, RevocationReason::Explicit)
            .await,
        Err(TokenError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_revoking_access_token_leaves_refresh_usable() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let access = harness.authority.validate(&pair.access_token).await?;

    harness
        .authority
        .revoke(access.token_id, RevocationReason::Explicit)
        .await?;
    assert!(matches!(
        harness.authority.validate(&pair.access_token).await,
        Err(TokenError::Revoked)
    ));

    let rotated = harness.authority.refresh(&pair.refresh_token).await?;
    assert!(harness.authority.validate(&rotated.access_token).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_revoked_refresh_token_cannot_refresh() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    let refresh = harness.authority.validate(&pair.refresh_token).await?;

    harness
        .authority
        .revoke(refresh.token_id, RevocationReason::Explicit)
        .await?;
    assert!(matches!(
        harness.authority.refresh(&pair.refresh_token).await,
        Err(TokenError::Revoked)
    ));
    // The access token of the same pair is untouched
    assert!(harness.authority.validate(&pair.access_token).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_ledger_entry_lives_until_token_expiry() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn_with(&[("ACCESS_TOKEN_TTL_SECONDS", "600")]).await?;
    let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
    harness
        .authority
        .revoke(issued.token.token_id, RevocationReason::Explicit)
        .await?;

    let entries = RevocationStore::list(harness.store.as_ref()).await?;
    assert_eq!(entries.len(), 1);
    let entry = entries.first().ok_or_else(|| anyhow::anyhow!("missing entry"))?;
    assert_eq!(entry.target, RevocationTarget::Token(issued.token.token_id));
    assert_eq!(entry.expires_at, issued.token.expires_at);
    assert_eq!(entry.reason, RevocationReason::Explicit);

    // Still present while the token could be presented
    harness.advance(Duration::seconds(599));
    assert_eq!(run_ledger_sweep(&harness.authority).await, 0);
    assert!(
        RevocationStore::contains(
            harness.store.as_ref(),
            RevocationTarget::Token(issued.token.token_id)
        )
        .await?
    );

    harness.advance(Duration::seconds(2));
    assert!(run_ledger_sweep(&harness.authority).await >= 1);
    assert!(
        !RevocationStore::contains(
            harness.store.as_ref(),
            RevocationTarget::Token(issued.token.token_id)
        )
        .await?
    );
    // Expiry now wins over the missing ledger entry
    assert!(matches!(
        harness.authority.validate(&issued.encoded).await,
        Err(TokenError::Expired)
    ));
    Ok(())
}

#[tokio::test]
async fn test_sweep_keeps_live_chain_revocations() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
    harness.authority.logout(&pair.refresh_token).await?;

    // Access token gone, refresh token and chain still live
    harness.advance(Duration::hours(1));
    let report = harness.authority.sweep(harness.now()).await?;
    assert_eq!(report.revocations, 1);
    assert!(
        RevocationStore::contains(
            harness.store.as_ref(),
            RevocationTarget::Chain(pair.chain_id)
        )
        .await?
    );
    assert!(matches!(
        harness.authority.refresh(&pair.refresh_token).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}
