//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs, a fixed master key and helpers for
//! signing tokens outside the authority (forged or foreign tokens).
//! All fixtures are deterministic based on seed values.

use base64::engine::general_purpose;
use base64::Engine;
use chrono::{DateTime, Utc};
use common::jwt::encode_ed25519_public_key_pem;
use ring::signature::{Ed25519KeyPair, KeyPair};
use std::collections::HashMap;
use thiserror::Error;
use token_service::config::Config;
use token_service::crypto::{self, Claims, SIGNING_ALGORITHM};
use token_service::models::SigningKey;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Invalid test configuration: {0}")]
    Config(String),
}

/// Generate a deterministic Ed25519 signing key for testing.
///
/// The same seed always produces the same keypair.
///
/// # Returns
/// * `Ok((public_key_pem, private_key_pkcs8))` - Public key in the authority's PEM
///   form, private key as a PKCS#8 v1 document
pub fn test_signing_key(seed: u8) -> Result<(String, Vec<u8>), FixtureError> {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }

    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    let public_key_pem = encode_ed25519_public_key_pem(key_pair.public_key().as_ref());
    let pkcs8_bytes = build_pkcs8_from_seed(&seed_bytes);

    Ok((public_key_pem, pkcs8_bytes))
}

/// Build PKCS#8 v1 document from Ed25519 seed
///
/// Test-only. Production keys come from `ring::rand::SystemRandom`.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // SEQUENCE (46 bytes)
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}

/// Test master key for key encryption
///
/// Returns a deterministic 32-byte master key for AES-256-GCM.
pub fn test_master_key() -> Vec<u8> {
    (0u8..32).collect()
}

/// Test master key in the form `TOKEN_MASTER_KEY` expects (base64).
pub fn test_master_key_b64() -> String {
    general_purpose::STANDARD.encode(test_master_key())
}

/// Authority configuration with the test master key and defaults elsewhere.
///
/// `overrides` are extra environment-style variables, e.g.
/// `[("ACCESS_TOKEN_TTL_SECONDS", "60")]`.
pub fn test_config(overrides: &[(&str, &str)]) -> Result<Config, FixtureError> {
    let mut vars = HashMap::from([("TOKEN_MASTER_KEY".to_string(), test_master_key_b64())]);
    for (name, value) in overrides {
        vars.insert((*name).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).map_err(|e| FixtureError::Config(e.to_string()))
}

/// A registry record for a deterministic key, encrypted under the test
/// master key. Insert it into a store to simulate a key rotated in by another
/// instance.
pub fn test_signing_key_record(
    seed: u8,
    key_id: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<SigningKey, FixtureError> {
    let (public_key_pem, private_key_pkcs8) = test_signing_key(seed)?;
    let private_key = crypto::encrypt_private_key(&private_key_pkcs8, &test_master_key())
        .map_err(|e| FixtureError::Crypto(e.to_string()))?;

    Ok(SigningKey {
        key_id: key_id.to_string(),
        algorithm: SIGNING_ALGORITHM.to_string(),
        public_key_pem,
        private_key,
        not_before,
        not_after,
        created_at: not_before,
    })
}

/// Sign `claims` with the deterministic key for `seed`, advertising `key_id`.
pub fn sign_with_test_key(claims: &Claims, seed: u8, key_id: &str) -> Result<String, FixtureError> {
    let (_, private_key_pkcs8) = test_signing_key(seed)?;
    let encoding_key = crypto::encoding_key_from_pkcs8(&private_key_pkcs8)
        .map_err(|e| FixtureError::Crypto(e.to_string()))?;
    crypto::sign_claims(claims, &encoding_key, key_id).map_err(|e| FixtureError::Crypto(e.to_string()))
}
