//! Token authority facade.
//!
//! Wires the key store, issuer, validator, revocation ledger and grant
//! coordinator over one set of persistence ports, and is the only type an
//! outer transport layer needs to hold.

use crate::clock::Clock;
use crate::config::Config;
use crate::errors::TokenError;
use crate::models::{
    AuthorizationCodeGrant, IssuedToken, Jwks, RevocationReason, ScopeSet, SigningKey,
    SweepReport, Token, TokenKind, TokenPair,
};
use crate::observability::{metrics, ErrorCategory};
use crate::repositories::{RetryPolicy, ScopeGrantStore, Stores};
use crate::services::grant_coordinator::{GrantCoordinator, GrantStores};
use crate::services::key_store::KeyStore;
use crate::services::revocation_ledger::RevocationLedger;
use crate::services::token_issuer::TokenIssuer;
use crate::services::token_validator::TokenValidator;
use chrono::{DateTime, Utc};
use common::types::TokenId;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Entry point for every token operation.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to request handlers
/// and background tasks.
pub struct TokenAuthority {
    key_store: Arc<KeyStore>,
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    ledger: Arc<RevocationLedger>,
    grants: GrantCoordinator,
    scope_grants: Arc<dyn ScopeGrantStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl TokenAuthority {
    pub fn new(config: &Config, stores: Stores, clock: Arc<dyn Clock>) -> Self {
        let key_store = Arc::new(KeyStore::new(config, stores.keys, Arc::clone(&clock)));
        let ledger = Arc::new(RevocationLedger::new(
            config,
            stores.revocations,
            Arc::clone(&stores.tokens),
            Arc::clone(&clock),
        ));
        let issuer = Arc::new(TokenIssuer::new(
            config,
            Arc::clone(&key_store),
            Arc::clone(&stores.grants),
            Arc::clone(&stores.tokens),
            Arc::clone(&clock),
        ));
        let validator = Arc::new(TokenValidator::new(
            config,
            Arc::clone(&key_store),
            Arc::clone(&ledger),
            Arc::clone(&clock),
        ));
        let grants = GrantCoordinator::new(
            config,
            Arc::clone(&issuer),
            Arc::clone(&validator),
            Arc::clone(&ledger),
            GrantStores {
                chains: stores.chains,
                codes: stores.codes,
                tokens: stores.tokens,
            },
            Arc::clone(&clock),
        );

        Self {
            key_store,
            issuer,
            validator,
            ledger,
            grants,
            scope_grants: stores.grants,
            retry: RetryPolicy::new(config.persistence_timeout),
            clock,
        }
    }

    /// Make sure a current signing key exists. Call once at startup.
    pub async fn initialize(&self) -> Result<SigningKey, TokenError> {
        observe("initialize", self.key_store.initialize().await)
    }

    pub async fn issue(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        observe("issue", self.issuer.issue(subject, scopes, kind, ttl).await)
    }

    pub async fn validate(&self, raw_token: &str) -> Result<Token, TokenError> {
        observe("validate", self.validator.validate(raw_token).await)
    }

    /// Revoke a single token. Returns `false` if it was already revoked.
    pub async fn revoke(&self, token_id: TokenId, reason: RevocationReason) -> Result<bool, TokenError> {
        observe("revoke", self.ledger.revoke(token_id, reason).await)
    }

    pub async fn rotate_key(&self) -> Result<SigningKey, TokenError> {
        observe("rotate_key", self.key_store.rotate().await)
    }

    pub async fn create_authorization_code(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        client_id: &str,
    ) -> Result<AuthorizationCodeGrant, TokenError> {
        observe(
            "create_authorization_code",
            self.grants
                .create_authorization_code(subject, scopes, client_id)
                .await,
        )
    }

    pub async fn exchange_auth_code(&self, code: &str, client_id: &str) -> Result<TokenPair, TokenError> {
        observe(
            "exchange_auth_code",
            self.grants.exchange_auth_code(code, client_id).await,
        )
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        observe("refresh", self.grants.refresh(refresh_token).await)
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<u64, TokenError> {
        observe("logout", self.grants.logout(refresh_token).await)
    }

    pub async fn logout_subject(&self, subject: &str) -> Result<u64, TokenError> {
        observe("logout_subject", self.grants.logout_subject(subject).await)
    }

    pub async fn jwks(&self) -> Result<Jwks, TokenError> {
        observe("jwks", self.key_store.jwks().await)
    }

    /// Add scopes to a subject's grants.
    pub async fn grant_scopes(&self, subject: &str, scopes: ScopeSet) -> Result<(), TokenError> {
        observe(
            "grant_scopes",
            self.retry
                .run("grants.grant", move || {
                    self.scope_grants.grant(subject, scopes.clone())
                })
                .await,
        )
    }

    /// Remove everything whose natural expiry is before `now`: ledger
    /// entries, token metadata, refresh chains, authorization codes and
    /// non-current signing keys.
    #[instrument(skip_all, name = "token.authority.sweep")]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, TokenError> {
        let result = async {
            let revocations = self.ledger.sweep(now).await?;
            let expired = self.grants.sweep_expired(now).await?;
            let keys = self.key_store.prune_expired().await?;
            metrics::record_sweep("keys", keys.len() as u64);

            Ok::<_, TokenError>(SweepReport {
                revocations,
                keys: keys.len() as u64,
                ..expired
            })
        }
        .await;

        if let Ok(report) = &result {
            tracing::info!(
                target: "token.authority",
                revocations = report.revocations,
                tokens = report.tokens,
                chains = report.chains,
                codes = report.codes,
                keys = report.keys,
                "Sweep complete"
            );
        }
        observe("sweep", result)
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn observe<T>(operation: &'static str, result: Result<T, TokenError>) -> Result<T, TokenError> {
    if let Err(e) = &result {
        let category = ErrorCategory::from(e);
        metrics::record_error(operation, category.as_str(), e.code());
        if category == ErrorCategory::Internal {
            tracing::error!(
                target: "token.authority",
                operation = operation,
                error = %e,
                "Token operation failed"
            );
        }
    }
    result
}
