//! Persistence ports.
//!
//! The token core never talks to a database directly. Each record type has a
//! small async port here; [`MemoryStore`] implements all of them for tests and
//! single-instance deployments. Every call made by a service goes through
//! [`RetryPolicy`], which owns the timeout and retry-once behavior.

mod memory;
mod retry;

pub use memory::MemoryStore;
pub use retry::RetryPolicy;

use crate::models::{
    AuthorizationCode, ChainSwap, CodeConsumption, RefreshChain, RevocationEntry,
    RevocationReason, RevocationTarget, ScopeSet, SigningKey, SwapOutcome, Token,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ChainId, TokenId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a persistence call. Always treated as transient by the services.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    async fn insert(&self, key: SigningKey) -> Result<(), StoreError>;

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError>;

    async fn current(&self) -> Result<Option<SigningKey>, StoreError>;

    /// Make `key_id` the current key. Returns `false` if the key does not exist.
    async fn promote(&self, key_id: &str) -> Result<bool, StoreError>;

    async fn list(&self) -> Result<Vec<SigningKey>, StoreError>;

    /// Delete non-current keys whose `not_after` is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

/// Metadata of every minted token, used to resolve expiry on revoke and to
/// find a chain's outstanding access tokens on logout.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn record(&self, token: Token) -> Result<(), StoreError>;

    async fn get(&self, token_id: TokenId) -> Result<Option<Token>, StoreError>;

    async fn list_by_chain(&self, chain_id: ChainId) -> Result<Vec<Token>, StoreError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RefreshChainStore: Send + Sync {
    async fn create(&self, chain: RefreshChain) -> Result<(), StoreError>;

    async fn get(&self, chain_id: ChainId) -> Result<Option<RefreshChain>, StoreError>;

    async fn list_by_subject(&self, subject: &str) -> Result<Vec<RefreshChain>, StoreError>;

    /// Atomically move the chain from `expected_token_id` to `new_token_id`.
    ///
    /// Implementations must check the version, the current token and the
    /// revoked flag and apply the update as one step. Re-applying a swap that
    /// already landed returns `Swapped` so a retried call is harmless.
    async fn compare_and_swap(&self, swap: ChainSwap) -> Result<SwapOutcome, StoreError>;

    /// Mark the chain revoked. The first revocation's timestamp and reason are
    /// kept. Returns `None` when the chain does not exist.
    async fn revoke(
        &self,
        chain_id: ChainId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<RefreshChain>, StoreError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Returns `false` when the target was already revoked; the first entry wins.
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, StoreError>;

    async fn contains(&self, target: RevocationTarget) -> Result<bool, StoreError>;

    /// Remove entries whose `expires_at` is strictly before `now`.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list(&self) -> Result<Vec<RevocationEntry>, StoreError>;
}

#[async_trait]
pub trait AuthCodeStore: Send + Sync {
    async fn insert(&self, code: AuthorizationCode) -> Result<(), StoreError>;

    /// Atomically mark a code consumed by `attempt`.
    ///
    /// A consumed code reports `AlreadyUsed` until it is deleted, even past its
    /// expiry. An unconsumed code past `expires_at` reports `Missing`.
    ///
    /// Implementations must store `attempt` with the consumption and answer
    /// `Fresh` again when the same `attempt` re-presents the code, so a retried
    /// call whose first acknowledgement was lost is not mistaken for a replay.
    async fn consume(
        &self,
        code_hash: &str,
        attempt: ChainId,
        now: DateTime<Utc>,
    ) -> Result<CodeConsumption, StoreError>;

    /// Record the chain produced by exchanging the code.
    ///
    /// Returns `true` if the code was presented again between `consume` and
    /// this call, in which case the caller must revoke the chain.
    async fn bind_chain(&self, code_hash: &str, chain_id: ChainId) -> Result<bool, StoreError>;

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Scopes each subject has been granted by the account layer.
#[async_trait]
pub trait ScopeGrantStore: Send + Sync {
    /// `None` when the subject is unknown.
    async fn granted_scopes(&self, subject: &str) -> Result<Option<ScopeSet>, StoreError>;

    /// Add `scopes` to the subject's grants.
    async fn grant(&self, subject: &str, scopes: ScopeSet) -> Result<(), StoreError>;
}

/// The set of ports a [`TokenAuthority`](crate::services::TokenAuthority) runs on.
#[derive(Clone)]
pub struct Stores {
    pub keys: Arc<dyn SigningKeyStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub chains: Arc<dyn RefreshChainStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub codes: Arc<dyn AuthCodeStore>,
    pub grants: Arc<dyn ScopeGrantStore>,
}

impl Stores {
    /// All ports backed by one fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }

    /// All ports backed by a single implementation.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SigningKeyStore
            + TokenStore
            + RefreshChainStore
            + RevocationStore
            + AuthCodeStore
            + ScopeGrantStore
            + 'static,
    {
        Stores {
            keys: backend.clone(),
            tokens: backend.clone(),
            chains: backend.clone(),
            revocations: backend.clone(),
            codes: backend.clone(),
            grants: backend,
        }
    }
}
