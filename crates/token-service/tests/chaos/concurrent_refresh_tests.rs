//! Concurrent use of one refresh token
//!
//! Racing refreshes of the same token must produce exactly one new pair, and
//! every loser counts as reuse: the whole chain ends up revoked.

use futures::future::join_all;
use std::sync::Arc;
use token_service::errors::TokenError;
use token_service::models::{RevocationTarget, TokenPair};
use token_service::repositories::{RefreshChainStore, RevocationStore};
use token_test_utils::*;

const RACERS: usize = 16;

async fn race_refresh(
    harness: &TestAuthority,
    refresh_token: &str,
) -> Result<Vec<Result<TokenPair, TokenError>>, anyhow::Error> {
    let handles = (0..RACERS).map(|_| {
        let authority = Arc::clone(&harness.authority);
        let raw = refresh_token.to_string();
        tokio::spawn(async move { authority.refresh(&raw).await })
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(anyhow::Error::from))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_refresh_has_single_winner() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;

    let outcomes = race_refresh(&harness, &pair.refresh_token).await?;

    let winners: Vec<&TokenPair> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one refresh may win");

    let reuse = outcomes
        .iter()
        .filter(|o| matches!(o, Err(TokenError::ReuseDetected)))
        .count();
    assert!(reuse >= 1, "losers must be reported as reuse");
    assert!(
        outcomes.iter().all(|o| matches!(
            o,
            Ok(_) | Err(TokenError::ReuseDetected) | Err(TokenError::Revoked)
        )),
        "unexpected outcome: {:?}",
        outcomes.iter().filter(|o| o.is_err()).collect::<Vec<_>>()
    );

    // Detected reuse takes the winner's tokens down with the chain
    let chain = RefreshChainStore::get(harness.store.as_ref(), pair.chain_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chain missing"))?;
    assert!(chain.revoked);
    assert_eq!(chain.version, 1);
    assert!(
        RevocationStore::contains(
            harness.store.as_ref(),
            RevocationTarget::Chain(pair.chain_id)
        )
        .await?
    );

    let winner = winners
        .first()
        .ok_or_else(|| anyhow::anyhow!("no winner"))?;
    assert!(matches!(
        harness.authority.validate(&winner.access_token).await,
        Err(TokenError::Revoked)
    ));
    assert!(matches!(
        harness.authority.refresh(&winner.refresh_token).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_chains_refresh_in_parallel() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;

    let mut pairs = Vec::new();
    for _ in 0..8 {
        pairs.push(harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?);
        pairs.push(harness.login(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?);
    }

    let handles = pairs.iter().map(|pair| {
        let authority = Arc::clone(&harness.authority);
        let raw = pair.refresh_token.clone();
        tokio::spawn(async move {
            let first = authority.refresh(&raw).await?;
            authority.refresh(&first.refresh_token).await
        })
    });

    for (joined, pair) in join_all(handles).await.into_iter().zip(&pairs) {
        let rotated = joined??;
        assert_eq!(rotated.chain_id, pair.chain_id);
        harness.authority.validate(&rotated.access_token).await?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_logout_racing_refresh_leaves_chain_revoked() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let pair = harness.login(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

    let refresher = {
        let authority = Arc::clone(&harness.authority);
        let raw = pair.refresh_token.clone();
        tokio::spawn(async move { authority.refresh(&raw).await })
    };
    let logout = {
        let authority = Arc::clone(&harness.authority);
        let raw = pair.refresh_token.clone();
        tokio::spawn(async move { authority.logout(&raw).await })
    };

    let refreshed = refresher.await?;
    logout.await??;

    // Whatever order they ran in, nothing from the chain survives
    if let Ok(rotated) = refreshed {
        assert!(matches!(
            harness.authority.validate(&rotated.access_token).await,
            Err(TokenError::Revoked)
        ));
        assert!(harness.authority.refresh(&rotated.refresh_token).await.is_err());
    }
    assert!(matches!(
        harness.authority.validate(&pair.access_token).await,
        Err(TokenError::Revoked)
    ));
    Ok(())
}
