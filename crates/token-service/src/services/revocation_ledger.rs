use crate::clock::Clock;
use crate::config::Config;
use crate::errors::TokenError;
use crate::models::{RevocationEntry, RevocationReason, RevocationTarget, Token};
use crate::observability::metrics;
use crate::repositories::{RetryPolicy, RevocationStore, TokenStore};
use chrono::{DateTime, Utc};
use common::types::{ChainId, TokenId};
use std::sync::Arc;
use tracing::instrument;

/// Record of revoked tokens and chains, kept until their natural expiry.
///
/// Writes go straight to the revocation store and reads never cache, so a
/// revocation is visible to the next validation on any thread.
pub struct RevocationLedger {
    revocations: Arc<dyn RevocationStore>,
    tokens: Arc<dyn TokenStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl RevocationLedger {
    pub fn new(
        config: &Config,
        revocations: Arc<dyn RevocationStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            revocations,
            tokens,
            retry: RetryPolicy::new(config.persistence_timeout),
            clock,
        }
    }

    /// Revoke a token by id, resolving its expiry from token metadata.
    ///
    /// Returns `false` if the token was already revoked.
    #[instrument(skip_all, name = "token.ledger.revoke", fields(token_id = %token_id))]
    pub async fn revoke(&self, token_id: TokenId, reason: RevocationReason) -> Result<bool, TokenError> {
        let token = self
            .retry
            .run("tokens.get", move || self.tokens.get(token_id))
            .await?
            .ok_or_else(|| TokenError::NotFound(format!("token {token_id}")))?;

        self.revoke_token(&token, reason).await
    }

    pub async fn revoke_token(&self, token: &Token, reason: RevocationReason) -> Result<bool, TokenError> {
        self.insert(RevocationTarget::Token(token.token_id), reason, token.expires_at)
            .await
    }

    /// Revoke every token of a chain. `expires_at` must cover the longest-lived
    /// token the chain has produced.
    pub async fn revoke_chain(
        &self,
        chain_id: ChainId,
        reason: RevocationReason,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, TokenError> {
        self.insert(RevocationTarget::Chain(chain_id), reason, expires_at)
            .await
    }

    pub async fn is_revoked(&self, token_id: TokenId) -> Result<bool, TokenError> {
        self.retry
            .run("revocations.contains", move || {
                self.revocations.contains(RevocationTarget::Token(token_id))
            })
            .await
    }

    pub async fn is_chain_revoked(&self, chain_id: ChainId) -> Result<bool, TokenError> {
        self.retry
            .run("revocations.contains", move || {
                self.revocations.contains(RevocationTarget::Chain(chain_id))
            })
            .await
    }

    /// Drop entries whose underlying token expired before `now`.
    #[instrument(skip_all, name = "token.ledger.sweep")]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, TokenError> {
        let removed = self
            .retry
            .run("revocations.sweep", move || self.revocations.sweep(now))
            .await?;

        tracing::debug!(target: "token.ledger", removed = removed, "Revocation ledger swept");
        metrics::record_sweep("revocations", removed);
        Ok(removed)
    }

    pub async fn entries(&self) -> Result<Vec<RevocationEntry>, TokenError> {
        self.retry
            .run("revocations.list", || self.revocations.list())
            .await
    }

    async fn insert(
        &self,
        target: RevocationTarget,
        reason: RevocationReason,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, TokenError> {
        let entry = RevocationEntry {
            target,
            revoked_at: self.clock.now(),
            reason,
            expires_at,
        };

        let inserted = self
            .retry
            .run("revocations.insert", move || {
                self.revocations.insert(entry.clone())
            })
            .await?;

        let target_label = match target {
            RevocationTarget::Token(_) => "token",
            RevocationTarget::Chain(_) => "chain",
        };

        if inserted {
            metrics::record_revocation(target_label, reason.as_str());
            tracing::info!(
                target: "token.ledger",
                revoked = ?target,
                reason = reason.as_str(),
                "Revocation recorded"
            );
        } else {
            tracing::debug!(
                target: "token.ledger",
                revoked = ?target,
                "Already revoked"
            );
        }

        Ok(inserted)
    }
}
