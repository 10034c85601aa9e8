//! Token authority harness for integration tests
//!
//! Provides [`TestAuthority`]: a fully wired [`TokenAuthority`] on a manual
//! clock, with seeded subjects and direct access to its backing store.

use crate::crypto_fixtures::test_config;
use crate::fault_injection::FlakyStore;
use crate::test_ids::{
    SCOPE_COMMENTS_WRITE, SCOPE_STORIES_READ, SCOPE_STORIES_WRITE, TEST_CLIENT_WEB,
    TEST_EPOCH_SECONDS, TEST_SUBJECT_ALICE, TEST_SUBJECT_BOB,
};
use chrono::{DateTime, Duration, Utc};
use common::secret::ExposeSecret;
use std::sync::Arc;
use token_service::clock::{Clock, ManualClock};
use token_service::config::Config;
use token_service::models::{IssuedToken, ScopeSet, TokenKind, TokenPair};
use token_service::repositories::{
    AuthCodeStore, MemoryStore, RefreshChainStore, RevocationStore, ScopeGrantStore,
    SigningKeyStore, Stores, TokenStore,
};
use token_service::services::TokenAuthority;

/// Test harness around a [`TokenAuthority`]
///
/// Starts at [`TEST_EPOCH_SECONDS`] with one signing key. Alice is granted
/// `stories:read stories:write comments:write`, Bob only `stories:read`.
///
/// # Example
/// ```rust,ignore
/// let harness = TestAuthority::spawn().await?;
/// let pair = harness.login(TEST_SUBJECT_ALICE, "stories:read").await?;
/// harness.advance(Duration::minutes(16));
/// assert!(matches!(harness.authority.validate(&pair.access_token).await, Err(TokenError::Expired)));
/// ```
pub struct TestAuthority<B = MemoryStore> {
    pub authority: Arc<TokenAuthority>,
    pub store: Arc<B>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
}

impl TestAuthority<MemoryStore> {
    /// Harness with default configuration on a fresh [`MemoryStore`].
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Harness with configuration overrides, e.g. `[("ACCESS_TOKEN_TTL_SECONDS", "60")]`.
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        Self::spawn_on(Arc::new(MemoryStore::new()), overrides).await
    }
}

impl TestAuthority<FlakyStore> {
    /// Harness on a [`FlakyStore`]. Faults are injected after setup.
    pub async fn spawn_flaky(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        Self::spawn_on(Arc::new(FlakyStore::new()), overrides).await
    }
}

impl<B> TestAuthority<B>
where
    B: SigningKeyStore
        + TokenStore
        + RefreshChainStore
        + RevocationStore
        + AuthCodeStore
        + ScopeGrantStore
        + 'static,
{
    /// Harness on any backend implementing every persistence port.
    pub async fn spawn_on(store: Arc<B>, overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let config = test_config(overrides)?;
        let start = DateTime::from_timestamp(TEST_EPOCH_SECONDS, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid test epoch"))?;
        let clock = Arc::new(ManualClock::new(start));

        let authority = Arc::new(TokenAuthority::new(
            &config,
            Stores::from_backend(Arc::clone(&store)),
            clock.clone(),
        ));
        authority
            .initialize()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize signing key: {}", e))?;

        let harness = Self {
            authority,
            store,
            clock,
            config,
        };
        harness
            .grant(
                TEST_SUBJECT_ALICE,
                &format!("{SCOPE_STORIES_READ} {SCOPE_STORIES_WRITE} {SCOPE_COMMENTS_WRITE}"),
            )
            .await?;
        harness.grant(TEST_SUBJECT_BOB, SCOPE_STORIES_READ).await?;

        Ok(harness)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Grant space-separated `scopes` to `subject`.
    pub async fn grant(&self, subject: &str, scopes: &str) -> Result<(), anyhow::Error> {
        self.authority
            .grant_scopes(subject, ScopeSet::parse(scopes))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to grant scopes: {}", e))
    }

    /// Run a full authorization-code grant for `subject` as the web client.
    pub async fn login(&self, subject: &str, scopes: &str) -> Result<TokenPair, anyhow::Error> {
        let grant = self
            .authority
            .create_authorization_code(subject, &ScopeSet::parse(scopes), TEST_CLIENT_WEB)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create authorization code: {}", e))?;

        self.authority
            .exchange_auth_code(grant.code.expose_secret(), TEST_CLIENT_WEB)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to exchange authorization code: {}", e))
    }

    /// Issue a standalone access token with the configured access TTL.
    pub async fn issue_access(&self, subject: &str, scopes: &str) -> Result<IssuedToken, anyhow::Error> {
        self.authority
            .issue(
                subject,
                &ScopeSet::parse(scopes),
                TokenKind::Access,
                self.config.access_token_ttl,
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to issue token: {}", e))
    }
}
