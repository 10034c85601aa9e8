use super::{
    AuthCodeStore, RefreshChainStore, RevocationStore, ScopeGrantStore, SigningKeyStore,
    StoreError, TokenStore,
};
use crate::models::{
    AuthorizationCode, ChainSwap, CodeConsumption, RefreshChain, RevocationEntry,
    RevocationReason, RevocationTarget, ScopeSet, SigningKey, SwapOutcome, Token,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ChainId, TokenId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process implementation of every persistence port.
///
/// Each record type sits behind its own `RwLock`. Check-and-set operations
/// (chain swap, code consumption, first-wins revocation) run inside a single
/// write-lock acquisition with no await in between, which makes them atomic
/// with respect to every other caller.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: RwLock<KeyRegistry>,
    tokens: RwLock<HashMap<TokenId, Token>>,
    chains: RwLock<HashMap<ChainId, RefreshChain>>,
    revocations: RwLock<HashMap<RevocationTarget, RevocationEntry>>,
    codes: RwLock<HashMap<String, CodeRecord>>,
    grants: RwLock<HashMap<String, ScopeSet>>,
}

#[derive(Debug, Default)]
struct KeyRegistry {
    keys: HashMap<String, SigningKey>,
    current: Option<String>,
}

#[derive(Debug)]
struct CodeRecord {
    code: AuthorizationCode,
    consumed_by: Option<ChainId>,
    chain_id: Option<ChainId>,
    replayed: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SigningKeyStore for MemoryStore {
    async fn insert(&self, key: SigningKey) -> Result<(), StoreError> {
        let mut registry = self.keys.write().await;
        registry.keys.insert(key.key_id.clone(), key);
        Ok(())
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError> {
        Ok(self.keys.read().await.keys.get(key_id).cloned())
    }

    async fn current(&self) -> Result<Option<SigningKey>, StoreError> {
        let registry = self.keys.read().await;
        Ok(registry
            .current
            .as_ref()
            .and_then(|id| registry.keys.get(id))
            .cloned())
    }

    async fn promote(&self, key_id: &str) -> Result<bool, StoreError> {
        let mut registry = self.keys.write().await;
        if !registry.keys.contains_key(key_id) {
            return Ok(false);
        }
        registry.current = Some(key_id.to_string());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<SigningKey>, StoreError> {
        let registry = self.keys.read().await;
        let mut keys: Vec<SigningKey> = registry.keys.values().cloned().collect();
        keys.sort_by(|a, b| a.not_before.cmp(&b.not_before));
        Ok(keys)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut guard = self.keys.write().await;
        let registry = &mut *guard;
        let current = registry.current.clone();
        let mut removed = Vec::new();
        registry.keys.retain(|key_id, key| {
            let keep = key.not_after > now || current.as_deref() == Some(key_id.as_str());
            if !keep {
                removed.push(key_id.clone());
            }
            keep
        });
        Ok(removed)
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn record(&self, token: Token) -> Result<(), StoreError> {
        self.tokens.write().await.insert(token.token_id, token);
        Ok(())
    }

    async fn get(&self, token_id: TokenId) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens.read().await.get(&token_id).cloned())
    }

    async fn list_by_chain(&self, chain_id: ChainId) -> Result<Vec<Token>, StoreError> {
        Ok(self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.chain_id == Some(chain_id))
            .cloned()
            .collect())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, t| t.expires_at >= now);
        Ok((before - tokens.len()) as u64)
    }
}

#[async_trait]
impl RefreshChainStore for MemoryStore {
    async fn create(&self, chain: RefreshChain) -> Result<(), StoreError> {
        self.chains.write().await.insert(chain.chain_id, chain);
        Ok(())
    }

    async fn get(&self, chain_id: ChainId) -> Result<Option<RefreshChain>, StoreError> {
        Ok(self.chains.read().await.get(&chain_id).cloned())
    }

    async fn list_by_subject(&self, subject: &str) -> Result<Vec<RefreshChain>, StoreError> {
        Ok(self
            .chains
            .read()
            .await
            .values()
            .filter(|c| c.subject == subject)
            .cloned()
            .collect())
    }

    async fn compare_and_swap(&self, swap: ChainSwap) -> Result<SwapOutcome, StoreError> {
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(&swap.chain_id) else {
            return Ok(SwapOutcome::Missing);
        };

        if chain.revoked {
            return Ok(SwapOutcome::Revoked);
        }

        // Same swap landed on an earlier attempt
        if chain.current_token_id == swap.new_token_id {
            return Ok(SwapOutcome::Swapped(chain.clone()));
        }

        if chain.version != swap.expected_version
            || chain.current_token_id != swap.expected_token_id
        {
            return Ok(SwapOutcome::Conflict {
                current_version: chain.version,
            });
        }

        chain.current_token_id = swap.new_token_id;
        chain.version = chain.version.saturating_add(1);
        chain.expires_at = swap.new_expires_at;
        Ok(SwapOutcome::Swapped(chain.clone()))
    }

    async fn revoke(
        &self,
        chain_id: ChainId,
        reason: RevocationReason,
        at: DateTime<Utc>,
    ) -> Result<Option<RefreshChain>, StoreError> {
        let mut chains = self.chains.write().await;
        let Some(chain) = chains.get_mut(&chain_id) else {
            return Ok(None);
        };

        if !chain.revoked {
            chain.revoked = true;
            chain.revoked_at = Some(at);
            chain.revocation_reason = Some(reason);
        }
        Ok(Some(chain.clone()))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut chains = self.chains.write().await;
        let before = chains.len();
        chains.retain(|_, c| c.expires_at >= now);
        Ok((before - chains.len()) as u64)
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn insert(&self, entry: RevocationEntry) -> Result<bool, StoreError> {
        let mut revocations = self.revocations.write().await;
        if revocations.contains_key(&entry.target) {
            return Ok(false);
        }
        revocations.insert(entry.target, entry);
        Ok(true)
    }

    async fn contains(&self, target: RevocationTarget) -> Result<bool, StoreError> {
        Ok(self.revocations.read().await.contains_key(&target))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut revocations = self.revocations.write().await;
        let before = revocations.len();
        revocations.retain(|_, e| e.expires_at >= now);
        Ok((before - revocations.len()) as u64)
    }

    async fn list(&self) -> Result<Vec<RevocationEntry>, StoreError> {
        Ok(self.revocations.read().await.values().cloned().collect())
    }
}

#[async_trait]
impl AuthCodeStore for MemoryStore {
    async fn insert(&self, code: AuthorizationCode) -> Result<(), StoreError> {
        self.codes.write().await.insert(
            code.code_hash.clone(),
            CodeRecord {
                code,
                consumed_by: None,
                chain_id: None,
                replayed: false,
            },
        );
        Ok(())
    }

    async fn consume(
        &self,
        code_hash: &str,
        attempt: ChainId,
        now: DateTime<Utc>,
    ) -> Result<CodeConsumption, StoreError> {
        let mut codes = self.codes.write().await;
        let Some(record) = codes.get_mut(code_hash) else {
            return Ok(CodeConsumption::Missing);
        };

        match record.consumed_by {
            // Same exchange retrying after a lost acknowledgement
            Some(by) if by == attempt => {
                return Ok(CodeConsumption::Fresh(record.code.clone()));
            }
            Some(_) => {
                record.replayed = true;
                return Ok(CodeConsumption::AlreadyUsed {
                    chain_id: record.chain_id,
                });
            }
            None => {}
        }

        if record.code.expires_at <= now {
            return Ok(CodeConsumption::Missing);
        }

        record.consumed_by = Some(attempt);
        Ok(CodeConsumption::Fresh(record.code.clone()))
    }

    async fn bind_chain(&self, code_hash: &str, chain_id: ChainId) -> Result<bool, StoreError> {
        let mut codes = self.codes.write().await;
        let Some(record) = codes.get_mut(code_hash) else {
            return Ok(false);
        };
        record.chain_id = Some(chain_id);
        Ok(record.replayed)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut codes = self.codes.write().await;
        let before = codes.len();
        codes.retain(|_, r| r.code.expires_at > now);
        Ok((before - codes.len()) as u64)
    }
}

#[async_trait]
impl ScopeGrantStore for MemoryStore {
    async fn granted_scopes(&self, subject: &str) -> Result<Option<ScopeSet>, StoreError> {
        Ok(self.grants.read().await.get(subject).cloned())
    }

    async fn grant(&self, subject: &str, scopes: ScopeSet) -> Result<(), StoreError> {
        let mut grants = self.grants.write().await;
        let entry = grants.entry(subject.to_string()).or_default();
        *entry = entry.union(&scopes);
        Ok(())
    }
}
