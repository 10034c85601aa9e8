//! Key rotation under concurrent issue and validate load

use chrono::Duration;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use token_service::models::{ScopeSet, TokenKind};
use token_service::repositories::SigningKeyStore;
use token_test_utils::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tokens_validate_while_keys_rotate() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let ttl = harness.config.access_token_ttl;

    let rotations = (0..4).map(|_| {
        let authority = Arc::clone(&harness.authority);
        tokio::spawn(async move { authority.rotate_key().await.map(|k| k.key_id) })
    });
    let traffic = (0..32).map(|i| {
        let authority = Arc::clone(&harness.authority);
        let subject = if i % 2 == 0 {
            TEST_SUBJECT_ALICE
        } else {
            TEST_SUBJECT_BOB
        };
        tokio::spawn(async move {
            let issued = authority
                .issue(
                    subject,
                    &ScopeSet::parse(SCOPE_STORIES_READ),
                    TokenKind::Access,
                    ttl,
                )
                .await?;
            authority.validate(&issued.encoded).await?;
            Ok::<_, token_service::errors::TokenError>(issued.token.key_id)
        })
    });

    let (rotated, used) = tokio::join!(join_all(rotations), join_all(traffic));

    let mut rotated_ids = HashSet::new();
    for joined in rotated {
        rotated_ids.insert(joined??);
    }
    assert_eq!(rotated_ids.len(), 4, "every rotation creates a distinct key");

    let mut used_ids = HashSet::new();
    for joined in used {
        used_ids.insert(joined??);
    }

    // Every key that signed something is still published
    let jwks = harness.authority.jwks().await?;
    let published: HashSet<String> = jwks.keys.into_iter().map(|k| k.kid).collect();
    assert!(used_ids.is_subset(&published));
    assert!(rotated_ids.is_subset(&published));
    assert_eq!(published.len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_due_rotation_happens_once() -> Result<(), anyhow::Error> {
    let harness = TestAuthority::spawn().await?;
    let before = harness.authority.key_store().current_key().await?;
    harness.advance(Duration::days(7));

    let handles = (0..8).map(|_| {
        let keys = Arc::clone(harness.authority.key_store());
        tokio::spawn(async move { keys.rotate_if_due().await })
    });

    let mut rotated = 0;
    for joined in join_all(handles).await {
        if joined??.is_some() {
            rotated += 1;
        }
    }
    assert_eq!(rotated, 1);

    let keys = SigningKeyStore::list(harness.store.as_ref()).await?;
    assert_eq!(keys.len(), 2);
    assert_ne!(
        harness.authority.key_store().current_key().await?.key_id,
        before.key_id
    );
    Ok(())
}
