//! Revocations become visible to validators on other worker threads
//!
//! A revoke that has returned must be observed by any validation that starts
//! afterwards, wherever the runtime schedules it.

use std::sync::Arc;
use tokio::sync::oneshot;
use token_service::errors::TokenError;
use token_service::models::RevocationReason;
use token_test_utils::*;

const ROUNDS: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_token_revoke_is_seen_by_validator_on_another_task() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    for _ in 0..ROUNDS {
        let issued = harness.issue_access(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;
        let (revoked_tx, revoked_rx) = oneshot::channel();

        let revoker = {
            let authority = Arc::clone(&harness.authority);
            let token_id = issued.token.token_id;
            tokio::spawn(async move {
                let outcome = authority.revoke(token_id, RevocationReason::Explicit).await;
                let _ = revoked_tx.send(());
                outcome
            })
        };
        let validator = {
            let authority = Arc::clone(&harness.authority);
            let raw = issued.encoded.clone();
            tokio::spawn(async move {
                revoked_rx.await.map_err(anyhow::Error::from)?;
                Ok::<_, anyhow::Error>(authority.validate(&raw).await)
            })
        };

        assert!(revoker.await??);
        let seen = validator.await??;
        assert!(
            matches!(seen, Err(TokenError::Revoked)),
            "validation after revoke returned {seen:?}"
        );
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logout_is_seen_by_validator_on_another_task() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    for _ in 0..ROUNDS {
        let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
        let (logged_out_tx, logged_out_rx) = oneshot::channel();

        let logout = {
            let authority = Arc::clone(&harness.authority);
            let raw = pair.refresh_token.clone();
            tokio::spawn(async move {
                let outcome = authority.logout(&raw).await;
                let _ = logged_out_tx.send(());
                outcome
            })
        };
        let validators: Vec<_> = [pair.access_token.clone(), pair.refresh_token.clone()]
            .into_iter()
            .map(|raw| {
                let authority = Arc::clone(&harness.authority);
                tokio::spawn(async move { authority.validate(&raw).await })
            })
            .collect();

        // Validations racing the logout may land on either side of it
        for handle in validators {
            let _ = handle.await?;
        }

        assert!(logout.await?? >= 1);
        logged_out_rx.await?;

        let after = {
            let authority = Arc::clone(&harness.authority);
            let access = pair.access_token.clone();
            let refresh = pair.refresh_token.clone();
            tokio::spawn(async move {
                (
                    authority.validate(&access).await,
                    authority.validate(&refresh).await,
                )
            })
        };
        let (access, refresh) = after.await?;
        assert!(
            matches!(access, Err(TokenError::Revoked)),
            "access token after logout returned {access:?}"
        );
        assert!(
            matches!(refresh, Err(TokenError::Revoked)),
            "refresh token after logout returned {refresh:?}"
        );
    }
    Ok(())
}
