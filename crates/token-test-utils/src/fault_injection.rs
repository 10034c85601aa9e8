//! Fault-injecting persistence for resilience tests
//!
//! [`FlakyStore`] wraps a [`MemoryStore`] and fails or stalls selected calls,
//! simulating an unreliable database behind the persistence ports.
//!
//! Operation names follow `<port>.<method>`, e.g. `tokens.record`,
//! `chains.compare_and_swap`, `revocations.contains`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ChainId, TokenId};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use token_service::models::{
    AuthorizationCode, ChainSwap, CodeConsumption, RefreshChain, RevocationEntry,
    RevocationReason, RevocationTarget, ScopeSet, SigningKey, SwapOutcome, Token,
};
use token_service::repositories::{
    AuthCodeStore, MemoryStore, RefreshChainStore, RevocationStore, ScopeGrantStore,
    SigningKeyStore, StoreError, TokenStore,
};

/// How long a stalled call sleeps before answering. Longer than any
/// persistence timeout a test configures.
pub const STALL_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Fail,
    Stall,
    LoseAck,
}

#[derive(Debug)]
struct Fault {
    operation_prefix: &'static str,
    remaining: usize,
    kind: FaultKind,
}

/// A [`MemoryStore`] whose calls can be made to fail or hang on demand.
///
/// # Example
/// ```rust,ignore
/// let store = Arc::new(FlakyStore::new());
/// store.fail_next("tokens.record", 1);   // retried, succeeds
/// store.fail_next("tokens.record", 2);   // PersistenceUnavailable
/// ```
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    faults: Mutex<Vec<Fault>>,
    calls: AtomicUsize,
    injected: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls whose operation starts with `operation_prefix`.
    /// An empty prefix matches every call.
    pub fn fail_next(&self, operation_prefix: &'static str, count: usize) {
        self.push(operation_prefix, count, FaultKind::Fail);
    }

    /// Stall the next `count` matching calls for [`STALL_DURATION`].
    pub fn stall_next(&self, operation_prefix: &'static str, count: usize) {
        self.push(operation_prefix, count, FaultKind::Stall);
    }

    /// Let the next `count` matching calls reach the inner store, then stall
    /// for [`STALL_DURATION`] before answering. The write lands but the caller
    /// times out, like a database acknowledgement lost in transit.
    pub fn lose_ack_next(&self, operation_prefix: &'static str, count: usize) {
        self.push(operation_prefix, count, FaultKind::LoseAck);
    }

    /// Drop every pending fault.
    pub fn heal(&self) {
        self.faults.lock().expect("fault plan poisoned").clear();
    }

    /// Total calls seen, faulted or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that hit an injected fault.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn push(&self, operation_prefix: &'static str, count: usize, kind: FaultKind) {
        self.faults
            .lock()
            .expect("fault plan poisoned")
            .push(Fault {
                operation_prefix,
                remaining: count,
                kind,
            });
    }

    fn take_fault(&self, operation: &str) -> Option<FaultKind> {
        let mut faults = self.faults.lock().expect("fault plan poisoned");
        let fault = faults
            .iter_mut()
            .find(|f| f.remaining > 0 && operation.starts_with(f.operation_prefix))?;
        fault.remaining -= 1;
        let kind = fault.kind;
        faults.retain(|f| f.remaining > 0);
        Some(kind)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        inner: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(kind) = self.take_fault(operation) else {
            return inner.await;
        };
        self.injected.fetch_add(1, Ordering::SeqCst);
        match kind {
            FaultKind::Fail => Err(StoreError::Unavailable(format!(
                "injected fault in {operation}"
            ))),
            FaultKind::Stall => {
                tokio::time::sleep(STALL_DURATION).await;
                inner.await
            }
            FaultKind::LoseAck => {
                let outcome = inner.await;
                tokio::time::sleep(STALL_DURATION).await;
                outcome
            }
        }
    }
}

#[async_trait]
impl SigningKeyStore for FlakyStore {
    async fn insert(&self, key: SigningKey) -> Result<(), StoreError> {
        self.call("keys.insert", SigningKeyStore::insert(&self.inner, key)).await
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError> {
        self.call("keys.get", SigningKeyStore::get(&self.inner, key_id)).await
    }

    async fn current(&self) -> Result<Option<SigningKey>, StoreError> {
        self.call("keys.current", self.inner.current()).await
    }

    async fn promote(&self, key_id: &str) -> Result<bool, StoreError> {
        self.call("keys.promote", self.inner.promote(key_id)).await
    }

    async fn list(&self) -> Result<Vec<SigningKey>, StoreError> {
        self.call("keys.list", SigningKeyStore::list(&self.inner)).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        self.call("keys.delete_expired", SigningKeyStore::delete_expired(&self.inner, now)).await
    }
}

#[async_trait]
impl TokenStore for FlakyStore {
    async fn record(&self, token: Token) -> Result<(), StoreError> {
        self.call("tokens.record", self.inner.record(token)).await
    }

    async fn get(&self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        self.call("tokens.get", TokenStore::get(&self.inner, token_id)).await
    }

    async fn list_by_chain(&self, chain_id: ChainId) -> Result<Vec<Token>, StoreError> {
        self.call("tokens.list_by_chain", self.inner.list_by_chain(chain_id)).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.call("tokens.delete_expired", TokenStore::delete_expired(&self.inner, now)).await
    }
}

#[async_trait]
impl RefreshChainStore for FlakyStore {
    async fn create(&self, chain: RefreshChain) -> Result<(), StoreError> {
        self.call("chains.create", self.inner.create(chain)).await
    }

    async fn get(&self, chain_id: ChainId) -> Result<Option<RefreshChain>, StoreError> {
        self.call("chains.get", RefreshChainStore::get(&self.inner, chain_id)).await
    }

    async fn list_by_subject(&self, subject: &str) -> Result<Vec<RefreshChain>, StoreError> {
        self.call("chains.list_by_subject", self.inner.list_by_subject(subject)).await
    }

    async fn compare_and_swap(&self, swap: ChainSwap) -> Result<SwapOutcome, StoreError> {
        self.call("chains.compare_and_swap", self.inner.compare_and_swap(swap)).await
    }

    async fn revoke(
        &self,
        chain_id: ChainId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<RefreshChain>, StoreError> {
        self.call("chains.revoke", self.inner.revoke(chain_id, reason, at)).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.call("chains.delete_expired", RefreshChainStore::delete_expired(&self.inner, now)).await
    }
}

#[async_trait]
impl RevocationStore for FlakyStore {
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, StoreError> {
        self.call("revocations.insert", RevocationStore::insert(&self.inner, entry)).await
    }

    async fn contains(&self, target: RevocationTarget) -> Result<bool, StoreError> {
        self.call("revocations.contains", self.inner.contains(target)).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.call("revocations.sweep", self.inner.sweep(now)).await
    }

    async fn list(&self) -> Result<Vec<RevocationEntry>, StoreError> {
        self.call("revocations.list", RevocationStore::list(&self.inner)).await
    }
}

#[async_trait]
impl AuthCodeStore for FlakyStore {
    async fn insert(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        self.call("codes.insert", AuthCodeStore::insert(&self.inner, code)).await
    }

    async fn consume(
        &self,
        code_hash: &str,
        attempt: ChainId,
        now: DateTime<Utc>,
    ) -> Result<CodeConsumption, StoreError> {
        self.call("codes.consume", self.inner.consume(code_hash, attempt, now)).await
    }

    async fn bind_chain(&self, code_hash: &str, chain_id: ChainId) -> Result<bool, StoreError> {
        self.call("codes.bind_chain", self.inner.bind_chain(code_hash, chain_id)).await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.call("codes.delete_expired", AuthCodeStore::delete_expired(&self.inner, now)).await
    }
}

#[async_trait]
impl ScopeGrantStore for FlakyStore {
    async fn granted_scopes(&self, subject: &str) -> Result<Option<ScopeSet>, StoreError> {
        self.call("grants.granted_scopes", self.inner.granted_scopes(subject)).await
    }

    async fn grant(&self, subject: &str, scopes: ScopeSet) -> Result<(), StoreError> {
        self.call("grants.grant", self.inner.grant(subject, scopes)).await
    }
}
