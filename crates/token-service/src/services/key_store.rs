use crate::clock::{to_chrono, truncate_to_seconds, Clock};
use crate::config::Config;
use crate::crypto::{self, SIGNING_ALGORITHM};
use crate::errors::TokenError;
use crate::models::{JsonWebKey, Jwks, SigningKey};
use crate::observability::metrics;
use crate::repositories::{RetryPolicy, SigningKeyStore};
use chrono::{DateTime, Duration, Utc};
use common::jwt::{decode_ed25519_public_key_pem, encode_ed25519_public_key_jwk};
use common::secret::{ExposeSecret, SecretBox};
use jsonwebtoken::{DecodingKey, EncodingKey};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Minimum spacing in seconds between verification-cache reloads triggered
/// by misses. Unknown `kid`s inside this window are rejected from the cache alone.
pub const KEY_RELOAD_MIN_INTERVAL_SECONDS: i64 = 10;

/// Public half of a signing key, ready for signature checks.
#[derive(Clone)]
pub struct VerificationKey {
    pub key_id: String,
    pub decoding_key: DecodingKey,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl VerificationKey {
    fn from_signing_key(key: &SigningKey) -> Result<Self, TokenError> {
        Ok(Self {
            key_id: key.key_id.clone(),
            decoding_key: crypto::decoding_key_from_pem(&key.public_key_pem)?,
            not_before: key.not_before,
            not_after: key.not_after,
        })
    }

    /// Whether a token issued at `issued_at` could have been signed by this key.
    pub fn covers(&self, issued_at: DateTime<Utc>) -> bool {
        self.not_before <= issued_at && issued_at < self.not_after
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("key_id", &self.key_id)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Decrypted signing material of the current key.
#[derive(Clone)]
pub struct SigningMaterial {
    pub key: SigningKey,
    pub encoding_key: EncodingKey,
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("key_id", &self.key.key_id)
            .field("encoding_key", &"[REDACTED]")
            .finish()
    }
}

/// Registry of signing keys with one designated current key.
///
/// Signing always goes through the current pointer in persistence.
/// Verification resolves keys by explicit `kid` through an in-process cache,
/// so a rotation never changes which key a given token is checked against.
pub struct KeyStore {
    keys: Arc<dyn SigningKeyStore>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    master_key: SecretBox<Vec<u8>>,
    key_id_prefix: String,
    key_validity: Duration,
    rotation_interval: Duration,
    verification_cache: RwLock<HashMap<String, Arc<VerificationKey>>>,
    signing_cache: RwLock<Option<Arc<SigningMaterial>>>,
    rotation_lock: Mutex<()>,
    last_reload: Mutex<Option<DateTime<Utc>>>,
}

impl KeyStore {
    pub fn new(config: &Config, keys: Arc<dyn SigningKeyStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            retry: RetryPolicy::new(config.persistence_timeout),
            clock,
            master_key: SecretBox::new(Box::new(config.master_key.expose_secret().clone())),
            key_id_prefix: config.key_id_prefix.clone(),
            key_validity: to_chrono(config.key_validity),
            rotation_interval: to_chrono(config.key_rotation_interval),
            verification_cache: RwLock::new(HashMap::new()),
            signing_cache: RwLock::new(None),
            rotation_lock: Mutex::new(()),
            last_reload: Mutex::new(None),
        }
    }

    /// Create and promote the first key if there is no current key.
    #[instrument(skip_all, name = "token.key_store.initialize")]
    pub async fn initialize(&self) -> Result<SigningKey, TokenError> {
        let _guard = self.rotation_lock.lock().await;

        if let Some(current) = self.retry.run("keys.current", || self.keys.current()).await? {
            tracing::debug!(
                target: "token.key_store",
                key_id = %current.key_id,
                "Signing key already initialized"
            );
            return Ok(current);
        }

        tracing::info!(target: "token.key_store", "No current signing key, generating one");
        self.rotate_locked().await
    }

    pub async fn current_key(&self) -> Result<SigningKey, TokenError> {
        self.retry
            .run("keys.current", || self.keys.current())
            .await?
            .ok_or_else(|| TokenError::NotFound("current signing key".to_string()))
    }

    pub async fn key_by_id(&self, key_id: &str) -> Result<SigningKey, TokenError> {
        self.retry
            .run("keys.get", move || self.keys.get(key_id))
            .await?
            .ok_or_else(|| TokenError::NotFound(format!("signing key {key_id}")))
    }

    /// Decrypted material of the current key, valid now.
    ///
    /// If the current key has run past `not_after` (the rotation task has
    /// not kept up) a new key is rotated in before signing. Concurrent
    /// callers that see the same expired key produce one rotation.
    pub async fn signing_material(&self) -> Result<Arc<SigningMaterial>, TokenError> {
        let now = self.clock.now();
        let mut current = self.current_key().await?;

        if !current.is_valid_at(now) {
            current = self.rotate_if_expired(now).await?;
        }

        if let Some(cached) = self.signing_cache.read().await.as_ref() {
            if cached.key.key_id == current.key_id {
                return Ok(Arc::clone(cached));
            }
        }

        // Promoted by another instance: we hold its public half already
        if !self.verification_cache.read().await.contains_key(&current.key_id) {
            let verification = Arc::new(VerificationKey::from_signing_key(&current)?);
            self.verification_cache
                .write()
                .await
                .insert(current.key_id.clone(), verification);
        }

        let material = Arc::new(self.decrypt(current)?);
        *self.signing_cache.write().await = Some(Arc::clone(&material));
        Ok(material)
    }

    /// Verification key for `key_id`.
    ///
    /// A cache miss reloads every key from persistence, which covers a
    /// rotation performed by another instance. Reloads are spaced at least
    /// [`KEY_RELOAD_MIN_INTERVAL_SECONDS`] apart and concurrent misses share one, so a
    /// stream of made-up `kid`s cannot turn into a stream of registry scans.
    /// A key that is still missing afterwards is `UnknownKey`.
    pub async fn verification_key(&self, key_id: &str) -> Result<Arc<VerificationKey>, TokenError> {
        if let Some(key) = self.verification_cache.read().await.get(key_id) {
            return Ok(Arc::clone(key));
        }

        let reloaded = self.reload_if_stale(key_id).await?;

        let found = self.verification_cache.read().await.get(key_id).cloned();
        let outcome = match (reloaded, found.is_some()) {
            (false, false) => "throttled",
            (_, true) => "found",
            (true, false) => "missing",
        };
        metrics::record_key_cache_reload(outcome);

        found.ok_or_else(|| {
            tracing::debug!(
                target: "token.key_store",
                key_id = %key_id,
                "Key not found after reload"
            );
            TokenError::UnknownKey {
                key_id: key_id.to_string(),
            }
        })
    }

    /// Generate a new key and make it current.
    ///
    /// The previous key stays in the registry and keeps verifying tokens until
    /// its `not_after`.
    #[instrument(skip_all, name = "token.key_store.rotate")]
    pub async fn rotate(&self) -> Result<SigningKey, TokenError> {
        let _guard = self.rotation_lock.lock().await;
        self.rotate_locked().await
    }

    /// Rotate if the current key is older than the rotation interval, or if
    /// there is no current key.
    #[instrument(skip_all, name = "token.key_store.rotate_if_due")]
    pub async fn rotate_if_due(&self) -> Result<Option<SigningKey>, TokenError> {
        let _guard = self.rotation_lock.lock().await;
        let now = self.clock.now();

        match self.retry.run("keys.current", || self.keys.current()).await? {
            Some(current) if now - current.not_before < self.rotation_interval => {
                tracing::debug!(
                    target: "token.key_store",
                    key_id = %current.key_id,
                    "Key rotation not due"
                );
                Ok(None)
            }
            _ => self.rotate_locked().await.map(Some),
        }
    }

    /// Public keys valid now, in JWKS form.
    pub async fn jwks(&self) -> Result<Jwks, TokenError> {
        let now = self.clock.now();
        let keys = self.retry.run("keys.list", || self.keys.list()).await?;

        let mut json_web_keys = Vec::with_capacity(keys.len());
        for key in keys.into_iter().filter(|k| k.is_valid_at(now)) {
            let raw = decode_ed25519_public_key_pem(&key.public_key_pem).map_err(|e| {
                TokenError::Crypto(format!("Invalid stored public key {}: {}", key.key_id, e))
            })?;
            json_web_keys.push(JsonWebKey {
                kid: key.key_id,
                kty: "OKP".to_string(),
                crv: "Ed25519".to_string(),
                x: encode_ed25519_public_key_jwk(&raw),
                use_: "sig".to_string(),
                alg: SIGNING_ALGORITHM.to_string(),
            });
        }

        Ok(Jwks {
            keys: json_web_keys,
        })
    }

    /// Delete non-current keys past `not_after`. Returns the deleted key ids.
    #[instrument(skip_all, name = "token.key_store.prune_expired")]
    pub async fn prune_expired(&self) -> Result<Vec<String>, TokenError> {
        let now = self.clock.now();
        let removed = self
            .retry
            .run("keys.delete_expired", || self.keys.delete_expired(now))
            .await?;

        if !removed.is_empty() {
            let mut cache = self.verification_cache.write().await;
            for key_id in &removed {
                cache.remove(key_id);
            }
            tracing::info!(
                target: "token.key_store",
                removed = removed.len(),
                "Pruned expired signing keys"
            );
        }

        self.refresh_active_gauge(now).await;
        Ok(removed)
    }

    /// Rotate only if the current key is still outside its validity window
    /// once the rotation lock is held.
    async fn rotate_if_expired(&self, now: DateTime<Utc>) -> Result<SigningKey, TokenError> {
        let _guard = self.rotation_lock.lock().await;

        match self.retry.run("keys.current", || self.keys.current()).await? {
            Some(current) if current.is_valid_at(now) => Ok(current),
            stale => {
                if let Some(stale) = &stale {
                    tracing::warn!(
                        target: "token.key_store",
                        key_id = %stale.key_id,
                        not_after = %stale.not_after,
                        "Current signing key is outside its validity window, rotating"
                    );
                }
                self.rotate_locked().await
            }
        }
    }

    async fn rotate_locked(&self) -> Result<SigningKey, TokenError> {
        let result = self.create_and_promote().await;
        metrics::record_key_rotation(if result.is_ok() { "success" } else { "error" });
        result
    }

    async fn create_and_promote(&self) -> Result<SigningKey, TokenError> {
        let now = truncate_to_seconds(self.clock.now());
        let key_id = self.next_key_id(now)?;

        let (public_key_pem, private_key_pkcs8) = crypto::generate_signing_key()?;
        let private_key =
            crypto::encrypt_private_key(private_key_pkcs8.expose_secret(), self.master_key.expose_secret())?;

        let not_after = now
            .checked_add_signed(self.key_validity)
            .ok_or_else(|| TokenError::Crypto("Key validity window overflows".to_string()))?;

        let key = SigningKey {
            key_id: key_id.clone(),
            algorithm: SIGNING_ALGORITHM.to_string(),
            public_key_pem,
            private_key,
            not_before: now,
            not_after,
            created_at: now,
        };

        let stored = key.clone();
        self.retry
            .run("keys.insert", move || self.keys.insert(stored.clone()))
            .await?;

        let promoted = self
            .retry
            .run("keys.promote", || self.keys.promote(&key_id))
            .await?;
        if !promoted {
            return Err(TokenError::NotFound(format!("signing key {key_id}")));
        }

        let verification = Arc::new(VerificationKey::from_signing_key(&key)?);
        self.verification_cache
            .write()
            .await
            .insert(key_id.clone(), verification);
        *self.signing_cache.write().await = Some(Arc::new(self.decrypt(key.clone())?));

        tracing::info!(
            target: "token.key_store",
            key_id = %key_id,
            not_before = %key.not_before,
            not_after = %key.not_after,
            "Signing key rotated"
        );
        self.refresh_active_gauge(now).await;

        Ok(key)
    }

    /// Reload unless another caller loaded `key_id` meanwhile or the last
    /// reload is too recent. Returns whether a reload ran.
    async fn reload_if_stale(&self, key_id: &str) -> Result<bool, TokenError> {
        let mut last_reload = self.last_reload.lock().await;

        if self.verification_cache.read().await.contains_key(key_id) {
            return Ok(false);
        }

        let now = self.clock.now();
        if let Some(at) = *last_reload {
            if now - at < Duration::seconds(KEY_RELOAD_MIN_INTERVAL_SECONDS) {
                tracing::debug!(
                    target: "token.key_store",
                    key_id = %key_id,
                    "Key cache reload skipped, last reload too recent"
                );
                return Ok(false);
            }
        }

        self.reload_verification_keys().await?;
        *last_reload = Some(now);
        Ok(true)
    }

    async fn reload_verification_keys(&self) -> Result<(), TokenError> {
        let keys = self.retry.run("keys.list", || self.keys.list()).await?;

        let mut loaded = HashMap::with_capacity(keys.len());
        for key in &keys {
            match VerificationKey::from_signing_key(key) {
                Ok(verification) => {
                    loaded.insert(key.key_id.clone(), Arc::new(verification));
                }
                Err(e) => {
                    tracing::warn!(
                        target: "token.key_store",
                        key_id = %key.key_id,
                        error = %e,
                        "Skipping signing key with unusable public key"
                    );
                }
            }
        }

        *self.verification_cache.write().await = loaded;
        Ok(())
    }

    fn decrypt(&self, key: SigningKey) -> Result<SigningMaterial, TokenError> {
        let private_key =
            crypto::decrypt_private_key(&key.private_key, self.master_key.expose_secret())?;
        let encoding_key = crypto::encoding_key_from_pkcs8(private_key.expose_secret())?;
        Ok(SigningMaterial { key, encoding_key })
    }

    /// `{prefix}-{YYYYMMDDHHMMSS}-{8 hex}`
    fn next_key_id(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let suffix = hex::encode(crypto::generate_random_bytes(4)?);
        Ok(format!(
            "{}-{}-{}",
            self.key_id_prefix,
            now.format("%Y%m%d%H%M%S"),
            suffix
        ))
    }

    async fn refresh_active_gauge(&self, now: DateTime<Utc>) {
        match self.keys.list().await {
            Ok(keys) => {
                metrics::set_active_signing_keys(keys.iter().filter(|k| k.is_valid_at(now)).count());
            }
            Err(e) => {
                tracing::debug!(
                    target: "token.key_store",
                    error = %e,
                    "Could not refresh active key gauge"
                );
            }
        }
    }
}
