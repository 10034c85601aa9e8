use crate::clock::Clock;
use crate::config::Config;
use crate::crypto;
use crate::errors::TokenError;
use crate::models::Token;
use crate::observability::{metrics, ErrorCategory};
use crate::services::key_store::KeyStore;
use crate::services::revocation_ledger::RevocationLedger;
use common::jwt::{extract_kid, validate_iat_at, JwtValidationError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Checks presented tokens.
///
/// Order of checks: structure, key, signature, expiry, issue time, then
/// revocation. Every failure maps to exactly one [`TokenError`] kind.
pub struct TokenValidator {
    key_store: Arc<KeyStore>,
    ledger: Arc<RevocationLedger>,
    clock: Arc<dyn Clock>,
    clock_skew: Duration,
}

impl TokenValidator {
    pub fn new(
        config: &Config,
        key_store: Arc<KeyStore>,
        ledger: Arc<RevocationLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key_store,
            ledger,
            clock,
            clock_skew: config.clock_skew,
        }
    }

    /// Full validation, including the revocation ledger.
    #[instrument(skip_all, name = "token.validator.validate")]
    pub async fn validate(&self, raw_token: &str) -> Result<Token, TokenError> {
        let start = Instant::now();
        let result = self.validate_inner(raw_token).await;

        match &result {
            Ok(_) => metrics::record_token_validation("success", None, start.elapsed()),
            Err(e) => metrics::record_token_validation(
                "error",
                Some(ErrorCategory::from(e).as_str()),
                start.elapsed(),
            ),
        }

        result
    }

    /// Every check except revocation.
    ///
    /// Used where a revoked token still has to be told apart from a reused one.
    #[instrument(skip_all, name = "token.validator.verify")]
    pub async fn verify(&self, raw_token: &str) -> Result<Token, TokenError> {
        let key_id = extract_kid(raw_token).map_err(|e| {
            tracing::debug!(target: "token.validator", error = %e, "Token structure rejected");
            TokenError::MalformedToken
        })?;

        let key = self.key_store.verification_key(&key_id).await?;
        let claims = crypto::verify_signature(raw_token, &key.decoding_key)?;
        let token = Token::from_claims(claims, &key_id)?;

        let now = self.clock.now();
        if token.expires_at <= now {
            tracing::debug!(
                target: "token.validator",
                token_id = %token.token_id,
                expires_at = %token.expires_at,
                "Token expired"
            );
            return Err(TokenError::Expired);
        }

        validate_iat_at(token.issued_at.timestamp(), self.clock_skew, now.timestamp()).map_err(
            |e| match e {
                JwtValidationError::IatTooFarInFuture => TokenError::NotYetValid,
                _ => TokenError::MalformedToken,
            },
        )?;

        if !key.covers(token.issued_at) {
            tracing::warn!(
                target: "token.validator",
                token_id = %token.token_id,
                key_id = %key_id,
                "Token issue time is outside its key's validity window"
            );
            return Err(TokenError::UnknownKey { key_id });
        }

        Ok(token)
    }

    async fn validate_inner(&self, raw_token: &str) -> Result<Token, TokenError> {
        let token = self.verify(raw_token).await?;

        if self.ledger.is_revoked(token.token_id).await? {
            tracing::debug!(target: "token.validator", token_id = %token.token_id, "Token revoked");
            return Err(TokenError::Revoked);
        }

        if let Some(chain_id) = token.chain_id {
            if self.ledger.is_chain_revoked(chain_id).await? {
                tracing::debug!(
                    target: "token.validator",
                    token_id = %token.token_id,
                    chain_id = %chain_id,
                    "Token chain revoked"
                );
                return Err(TokenError::Revoked);
            }
        }

        Ok(token)
    }
}
