use crate::clock::{to_chrono, truncate_to_seconds, Clock};
use crate::config::Config;
use crate::crypto;
use crate::errors::TokenError;
use crate::models::{
    AuthorizationCode, AuthorizationCodeGrant, ChainSwap, CodeConsumption, GrantState,
    IssuedToken, RefreshChain, RevocationReason, ScopeSet, SweepReport, SwapOutcome, Token,
    TokenKind, TokenPair,
};
use crate::observability::{hash_for_correlation, metrics};
use crate::repositories::{AuthCodeStore, RefreshChainStore, RetryPolicy, TokenStore};
use crate::services::revocation_ledger::RevocationLedger;
use crate::services::token_issuer::TokenIssuer;
use crate::services::token_validator::TokenValidator;
use chrono::{DateTime, Duration, Utc};
use common::secret::ExposeSecret;
use common::types::ChainId;
use std::sync::Arc;
use tracing::instrument;

/// Drives authorization-code and refresh-token grants.
///
/// A chain moves `Issued -> Active` on code exchange. Each refresh moves the
/// presented token `Active -> Refreshed` and makes the new one `Active`.
/// Reuse of a `Refreshed` token, a lost compare-and-swap, or a replayed code
/// revoke the whole chain.
pub struct GrantCoordinator {
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    ledger: Arc<RevocationLedger>,
    chains: Arc<dyn RefreshChainStore>,
    codes: Arc<dyn AuthCodeStore>,
    tokens: Arc<dyn TokenStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    access_token_ttl: std::time::Duration,
    refresh_token_ttl: std::time::Duration,
    auth_code_ttl: Duration,
}

/// Dependencies of a [`GrantCoordinator`].
pub struct GrantStores {
    pub chains: Arc<dyn RefreshChainStore>,
    pub codes: Arc<dyn AuthCodeStore>,
    pub tokens: Arc<dyn TokenStore>,
}

impl GrantCoordinator {
    pub fn new(
        config: &Config,
        issuer: Arc<TokenIssuer>,
        validator: Arc<TokenValidator>,
        ledger: Arc<RevocationLedger>,
        stores: GrantStores,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            validator,
            ledger,
            chains: stores.chains,
            codes: stores.codes,
            tokens: stores.tokens,
            retry: RetryPolicy::new(config.persistence_timeout),
            clock,
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
            auth_code_ttl: to_chrono(config.auth_code_ttl),
        }
    }

    /// Mint a single-use authorization code for `subject`.
    ///
    /// Only the SHA-256 digest of the code is stored.
    #[instrument(skip_all, name = "token.grants.create_code")]
    pub async fn create_authorization_code(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        client_id: &str,
    ) -> Result<AuthorizationCodeGrant, TokenError> {
        self.issuer.check_scopes(subject, scopes).await?;

        let code = crypto::generate_authorization_code()?;
        let issued_at = truncate_to_seconds(self.clock.now());
        let expires_at = issued_at
            .checked_add_signed(self.auth_code_ttl)
            .ok_or_else(|| TokenError::InvalidGrant("code lifetime overflows".to_string()))?;

        let record = AuthorizationCode {
            code_hash: crypto::hash_authorization_code(code.expose_secret()),
            subject: subject.to_string(),
            client_id: client_id.to_string(),
            scopes: scopes.clone(),
            issued_at,
            expires_at,
        };
        self.retry
            .run("codes.insert", move || self.codes.insert(record.clone()))
            .await?;

        tracing::debug!(
            target: "token.grants",
            subject = %hash_for_correlation(subject),
            client = %hash_for_correlation(client_id),
            expires_at = %expires_at,
            "Authorization code created"
        );

        Ok(AuthorizationCodeGrant { code, expires_at })
    }

    /// Exchange an authorization code for an access/refresh pair.
    ///
    /// # Errors
    ///
    /// - `InvalidGrant` for an unknown or expired code, or a client mismatch
    /// - `ReuseDetected` if the code was already exchanged; the chain it
    ///   produced is revoked
    #[instrument(skip_all, name = "token.grants.exchange_code")]
    pub async fn exchange_auth_code(&self, code: &str, client_id: &str) -> Result<TokenPair, TokenError> {
        let result = self.exchange(code, client_id).await;
        metrics::record_code_exchange(match &result {
            Ok(_) => "success",
            Err(TokenError::InvalidGrant(_)) => "invalid",
            Err(TokenError::ReuseDetected) => "replayed",
            Err(_) => "error",
        });
        result
    }

    /// Rotate a refresh token.
    ///
    /// The new pair is minted before the compare-and-swap, so nothing is held
    /// across persistence calls. If the swap loses, the minted pair is never
    /// returned and the chain is revoked.
    #[instrument(skip_all, name = "token.grants.refresh")]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let result = self.rotate(refresh_token).await;
        metrics::record_refresh_outcome(match &result {
            Ok(_) => "success",
            Err(TokenError::ReuseDetected) => "reuse_detected",
            Err(_) => "error",
        });
        result
    }

    /// Revoke the chain of a presented refresh token.
    ///
    /// Returns the number of new revocation entries.
    #[instrument(skip_all, name = "token.grants.logout")]
    pub async fn logout(&self, refresh_token: &str) -> Result<u64, TokenError> {
        let presented = self.validator.verify(refresh_token).await?;
        let chain_id = Self::chain_of(&presented)?;

        let chain = self.get_chain(chain_id).await?;
        self.revoke_chain(&chain, RevocationReason::Logout).await
    }

    /// Revoke every live chain of `subject`.
    #[instrument(skip_all, name = "token.grants.logout_subject")]
    pub async fn logout_subject(&self, subject: &str) -> Result<u64, TokenError> {
        let chains = self
            .retry
            .run("chains.list_by_subject", move || {
                self.chains.list_by_subject(subject)
            })
            .await?;

        let mut revoked = 0;
        for chain in chains.iter().filter(|c| !c.revoked) {
            revoked += self.revoke_chain(chain, RevocationReason::Logout).await?;
        }

        tracing::info!(
            target: "token.grants",
            subject = %hash_for_correlation(subject),
            revoked = revoked,
            "Subject logged out"
        );
        Ok(revoked)
    }

    /// Delete expired codes, chains and token metadata.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport, TokenError> {
        let codes = self
            .retry
            .run("codes.delete_expired", move || self.codes.delete_expired(now))
            .await?;
        let chains = self
            .retry
            .run("chains.delete_expired", move || {
                self.chains.delete_expired(now)
            })
            .await?;
        let tokens = self
            .retry
            .run("tokens.delete_expired", move || {
                self.tokens.delete_expired(now)
            })
            .await?;

        metrics::record_sweep("codes", codes);
        metrics::record_sweep("chains", chains);
        metrics::record_sweep("tokens", tokens);

        Ok(SweepReport {
            codes,
            chains,
            tokens,
            ..SweepReport::default()
        })
    }

    async fn exchange(&self, code: &str, client_id: &str) -> Result<TokenPair, TokenError> {
        let code_hash = crypto::hash_authorization_code(code);
        let now = self.clock.now();
        // Also the consumption attempt, so a retried consume is recognised
        let chain_id = ChainId::new();

        let consumed = self
            .retry
            .run("codes.consume", || {
                self.codes.consume(&code_hash, chain_id, now)
            })
            .await?;

        let record = match consumed {
            CodeConsumption::Fresh(record) => record,
            CodeConsumption::Missing => {
                return Err(TokenError::InvalidGrant(
                    "authorization code is invalid or expired".to_string(),
                ));
            }
            CodeConsumption::AlreadyUsed { chain_id } => {
                tracing::warn!(
                    target: "token.grants",
                    chain_id = ?chain_id,
                    "Authorization code replayed"
                );
                if let Some(chain_id) = chain_id {
                    let chain = self.get_chain(chain_id).await?;
                    self.revoke_chain(&chain, RevocationReason::CodeReplay).await?;
                }
                return Err(TokenError::ReuseDetected);
            }
        };

        if record.client_id != client_id {
            tracing::warn!(
                target: "token.grants",
                expected = %hash_for_correlation(&record.client_id),
                presented = %hash_for_correlation(client_id),
                "Authorization code presented by another client"
            );
            return Err(TokenError::InvalidGrant(
                "authorization code was issued to another client".to_string(),
            ));
        }

        let (access, refresh) = self
            .mint_pair(&record.subject, &record.scopes, chain_id)
            .await?;

        let chain = RefreshChain {
            chain_id,
            subject: record.subject.clone(),
            client_id: record.client_id.clone(),
            scopes: record.scopes.clone(),
            current_token_id: refresh.token.token_id,
            version: 0,
            created_at: refresh.token.issued_at,
            expires_at: refresh.token.expires_at,
            revoked: false,
            revoked_at: None,
            revocation_reason: None,
        };
        let stored = chain.clone();
        self.retry
            .run("chains.create", move || self.chains.create(stored.clone()))
            .await?;

        let replayed = self
            .retry
            .run("codes.bind_chain", || {
                self.codes.bind_chain(&code_hash, chain_id)
            })
            .await?;
        if replayed {
            tracing::warn!(
                target: "token.grants",
                chain_id = %chain_id,
                "Authorization code replayed during exchange"
            );
            self.revoke_chain(&chain, RevocationReason::CodeReplay).await?;
            return Err(TokenError::ReuseDetected);
        }

        debug_assert!(GrantState::Issued.can_transition_to(GrantState::Active));
        tracing::info!(
            target: "token.grants",
            chain_id = %chain_id,
            subject = %hash_for_correlation(&record.subject),
            "Authorization code exchanged"
        );

        Ok(TokenPair::new(&access, &refresh, chain_id))
    }

    async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let presented = self.validator.verify(refresh_token).await?;
        let chain_id = Self::chain_of(&presented)?;
        let chain = self.get_chain(chain_id).await?;
        let now = self.clock.now();

        match GrantState::of(&chain, presented.token_id, now) {
            GrantState::Active => {}
            GrantState::Refreshed => return self.reuse_detected(&chain, &presented).await,
            GrantState::Revoked if chain.current_token_id != presented.token_id => {
                return self.reuse_detected(&chain, &presented).await;
            }
            GrantState::Revoked => return Err(TokenError::Revoked),
            GrantState::Expired => return Err(TokenError::Expired),
            GrantState::Issued => {
                return Err(TokenError::InvalidGrant("grant is not active".to_string()));
            }
        }

        if self.ledger.is_revoked(presented.token_id).await? {
            // Rotated by a concurrent refresh since the chain was read
            let latest = self.get_chain(chain_id).await?;
            if latest.current_token_id != presented.token_id {
                return self.reuse_detected(&latest, &presented).await;
            }
            return Err(TokenError::Revoked);
        }

        let (access, refresh) = self
            .mint_pair(&chain.subject, &chain.scopes, chain_id)
            .await?;

        let swap = ChainSwap {
            chain_id,
            expected_version: chain.version,
            expected_token_id: presented.token_id,
            new_token_id: refresh.token.token_id,
            new_expires_at: refresh.token.expires_at,
        };

        match self
            .retry
            .run("chains.compare_and_swap", move || {
                self.chains.compare_and_swap(swap)
            })
            .await?
        {
            SwapOutcome::Swapped(updated) => {
                debug_assert!(GrantState::Active.can_transition_to(GrantState::Refreshed));
                self.ledger
                    .revoke_token(&presented, RevocationReason::Rotated)
                    .await?;

                tracing::debug!(
                    target: "token.grants",
                    chain_id = %chain_id,
                    version = updated.version,
                    "Refresh chain rotated"
                );
                Ok(TokenPair::new(&access, &refresh, chain_id))
            }
            SwapOutcome::Conflict { current_version } => {
                tracing::warn!(
                    target: "token.grants",
                    chain_id = %chain_id,
                    expected_version = chain.version,
                    current_version = current_version,
                    "Concurrent refresh lost the swap"
                );
                self.reuse_detected(&chain, &presented).await
            }
            SwapOutcome::Revoked => Err(TokenError::Revoked),
            SwapOutcome::Missing => Err(TokenError::InvalidGrant("unknown grant".to_string())),
        }
    }

    async fn reuse_detected(
        &self,
        chain: &RefreshChain,
        presented: &Token,
    ) -> Result<TokenPair, TokenError> {
        tracing::warn!(
            target: "token.grants",
            chain_id = %chain.chain_id,
            token_id = %presented.token_id,
            subject = %hash_for_correlation(&chain.subject),
            "Refresh token reuse detected, revoking chain"
        );
        self.revoke_chain(chain, RevocationReason::ReuseDetected)
            .await?;
        Err(TokenError::ReuseDetected)
    }

    /// Mark the chain revoked, add a ledger entry for it, and revoke each of
    /// its outstanding tokens. Returns the number of new ledger entries.
    async fn revoke_chain(&self, chain: &RefreshChain, reason: RevocationReason) -> Result<u64, TokenError> {
        let chain_id = chain.chain_id;
        let now = self.clock.now();

        self.retry
            .run("chains.revoke", move || {
                self.chains.revoke(chain_id, reason, now)
            })
            .await?;

        let outstanding: Vec<Token> = self
            .retry
            .run("tokens.list_by_chain", move || {
                self.tokens.list_by_chain(chain_id)
            })
            .await?
            .into_iter()
            .filter(|t| !t.is_expired_at(now))
            .collect();

        let chain_expiry = outstanding
            .iter()
            .map(|t| t.expires_at)
            .fold(chain.expires_at, std::cmp::max);

        let mut revoked = u64::from(
            self.ledger
                .revoke_chain(chain_id, reason, chain_expiry)
                .await?,
        );
        for token in &outstanding {
            revoked += u64::from(self.ledger.revoke_token(token, reason).await?);
        }

        tracing::info!(
            target: "token.grants",
            chain_id = %chain_id,
            reason = reason.as_str(),
            revoked = revoked,
            "Refresh chain revoked"
        );
        Ok(revoked)
    }

    async fn mint_pair(
        &self,
        subject: &str,
        scopes: &ScopeSet,
        chain_id: ChainId,
    ) -> Result<(IssuedToken, IssuedToken), TokenError> {
        let access = self
            .issuer
            .issue_for_chain(
                subject,
                scopes,
                TokenKind::Access,
                self.access_token_ttl,
                Some(chain_id),
            )
            .await?;
        let refresh = self
            .issuer
            .issue_for_chain(
                subject,
                scopes,
                TokenKind::Refresh,
                self.refresh_token_ttl,
                Some(chain_id),
            )
            .await?;
        Ok((access, refresh))
    }

    async fn get_chain(&self, chain_id: ChainId) -> Result<RefreshChain, TokenError> {
        self.retry
            .run("chains.get", move || self.chains.get(chain_id))
            .await?
            .ok_or_else(|| TokenError::InvalidGrant("unknown grant".to_string()))
    }

    fn chain_of(token: &Token) -> Result<ChainId, TokenError> {
        match (token.kind, token.chain_id) {
            (TokenKind::Refresh, Some(chain_id)) => Ok(chain_id),
            _ => Err(TokenError::InvalidGrant(
                "a refresh token is required".to_string(),
            )),
        }
    }
}
