use crate::clock::{truncate_to_seconds, Clock};
use crate::config::Config;
use crate::crypto;
use crate::errors::TokenError;
use crate::models::{IssuedToken, ScopeSet, Token, TokenKind};
use crate::observability::{hash_for_correlation, metrics};
use crate::repositories::{RetryPolicy, ScopeGrantStore, TokenStore};
use crate::services::key_store::KeyStore;
use chrono::Duration;
use common::types::{ChainId, TokenId};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Mints signed tokens with the current key.
pub struct TokenIssuer {
    key_store: Arc<KeyStore>,
    grants: Arc<dyn ScopeGrantStore>,
    tokens: Arc<dyn TokenStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(
        config: &Config,
        key_store: Arc<KeyStore>,
        grants: Arc<dyn ScopeGrantStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key_store,
            grants,
            tokens,
            retry: RetryPolicy::new(config.persistence_timeout),
            clock,
        }
    }

    /// Issue a standalone token for `subject`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the subject has no grants on record
    /// - `InvalidScope` if `scopes` is not a subset of the subject's grants
    /// - `InvalidGrant` if `ttl` is zero
    pub async fn issue(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        kind: TokenKind,
        ttl: std::time::Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_for_chain(subject, scopes, kind, ttl, None).await
    }

    /// Issue a token that belongs to a refresh chain (`cid` claim).
    #[instrument(skip_all, name = "token.issuer.issue", fields(kind = kind.as_str()))]
    pub async fn issue_for_chain(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        kind: TokenKind,
        ttl: std::time::Duration,
        chain_id: Option<ChainId>,
    ) -> Result<IssuedToken, TokenError> {
        let start = Instant::now();
        let result = self.mint(subject, scopes, kind, ttl, chain_id).await;

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_token_issuance(kind.as_str(), status, start.elapsed());

        result
    }

    /// Check `requested` against the subject's granted scopes.
    pub async fn check_scopes(&self, subject: &str, requested: &ScopeSet) -> Result<(), TokenError> {
        let granted = self
            .retry
            .run("grants.granted_scopes", move || self.grants.granted_scopes(subject))
            .await?
            .ok_or_else(|| TokenError::NotFound("subject".to_string()))?;

        let missing = requested.missing_from(&granted);
        if !missing.is_empty() {
            tracing::debug!(
                target: "token.issuer",
                subject = %hash_for_correlation(subject),
                missing = ?missing,
                "Requested scopes exceed grants"
            );
            return Err(TokenError::InvalidScope { missing });
        }

        Ok(())
    }

    async fn mint(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        kind: TokenKind,
        ttl: std::time::Duration,
        chain_id: Option<ChainId>,
    ) -> Result<IssuedToken, TokenError> {
        if ttl.is_zero() {
            return Err(TokenError::InvalidGrant(
                "token lifetime must be positive".to_string(),
            ));
        }

        self.check_scopes(subject, scopes).await?;

        let material = self.key_store.signing_material().await?;
        let issued_at = truncate_to_seconds(self.clock.now());

        // A token never outlives the key that signed it
        let expires_at = Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .map_or(material.key.not_after, |exp| exp.min(material.key.not_after));

        let token = Token {
            token_id: TokenId::new(),
            subject: subject.to_string(),
            scopes: scopes.clone(),
            issued_at,
            expires_at,
            key_id: material.key.key_id.clone(),
            kind,
            chain_id,
        };

        let encoded = crypto::sign_claims(&token.to_claims(), &material.encoding_key, &token.key_id)?;

        let recorded = token.clone();
        self.retry
            .run("tokens.record", move || self.tokens.record(recorded.clone()))
            .await?;

        tracing::debug!(
            target: "token.issuer",
            token_id = %token.token_id,
            key_id = %token.key_id,
            subject = %hash_for_correlation(subject),
            chain_id = ?token.chain_id,
            expires_at = %token.expires_at,
            "Token issued"
        );

        Ok(IssuedToken { token, encoded })
    }
}
