use crate::errors::TokenError;
use crate::models::TokenKind;
use base64::{engine::general_purpose, Engine as _};
use common::jwt::{decode_ed25519_public_key_pem, encode_ed25519_public_key_pem};
use common::secret::{ExposeSecret, SecretBox, SecretString};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::{
    aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM},
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::instrument;

/// Signature algorithm of every key this service generates.
pub const SIGNING_ALGORITHM: &str = "EdDSA";

/// Size of opaque authorization codes before encoding (256 bits).
pub const AUTH_CODE_BYTES: usize = 32;

/// Wire claims of a signed token.
///
/// `sub` is redacted in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token ID
    pub jti: String,
    /// Subject (user ID)
    pub sub: String,
    /// Space-separated scopes
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
    /// Refresh chain ID, present on tokens minted by a grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("jti", &self.jti)
            .field("sub", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("kind", &self.kind)
            .field("cid", &self.cid)
            .finish()
    }
}

/// Private key material encrypted with AES-256-GCM.
///
/// Debug redacts every field; Clone is manual because `SecretBox` is not `Clone`.
pub struct EncryptedKey {
    /// Ciphertext of the PKCS#8 document. Use `.expose_secret()` to read.
    pub encrypted_data: SecretBox<Vec<u8>>,
    pub nonce: Vec<u8>, // 96-bit (12 bytes)
    pub tag: Vec<u8>,   // 128-bit (16 bytes)
}

impl Clone for EncryptedKey {
    fn clone(&self) -> Self {
        Self {
            encrypted_data: SecretBox::new(Box::new(self.encrypted_data.expose_secret().clone())),
            nonce: self.nonce.clone(),
            tag: self.tag.clone(),
        }
    }
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedKey")
            .field("encrypted_data", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .field("tag", &"[REDACTED]")
            .finish()
    }
}

/// Generate an Ed25519 keypair.
///
/// Returns (public_key_pem, private_key_pkcs8). The PKCS#8 document is wrapped
/// so it is zeroized once the caller has encrypted it.
#[instrument(skip_all)]
pub fn generate_signing_key() -> Result<(String, SecretBox<Vec<u8>>), TokenError> {
    let rng = SystemRandom::new();

    let pkcs8_bytes = Ed25519KeyPair::generate_pkcs8(&rng)
        .map_err(|e| TokenError::Crypto(format!("Keypair generation failed: {}", e)))?;

    let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8_bytes.as_ref())
        .map_err(|e| TokenError::Crypto(format!("Keypair parsing failed: {}", e)))?;

    let public_key_pem = encode_ed25519_public_key_pem(key_pair.public_key().as_ref());

    Ok((
        public_key_pem,
        SecretBox::new(Box::new(pkcs8_bytes.as_ref().to_vec())),
    ))
}

/// Encrypt private key with AES-256-GCM.
///
/// Uses a random 96-bit nonce and produces a 128-bit authentication tag.
#[instrument(skip_all)]
pub fn encrypt_private_key(
    private_key: &[u8],
    master_key: &[u8],
) -> Result<EncryptedKey, TokenError> {
    check_master_key(master_key)?;

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; 12];
    rng.fill(&mut nonce_bytes)
        .map_err(|e| TokenError::Crypto(format!("Nonce generation failed: {}", e)))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| TokenError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut in_out = private_key.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| TokenError::Crypto(format!("Encryption operation failed: {}", e)))?;

    // Buffer is ciphertext followed by the 16-byte tag
    let tag_start = in_out
        .len()
        .checked_sub(16)
        .ok_or_else(|| TokenError::Crypto("Encryption produced invalid output".to_string()))?;
    let tag = in_out.split_off(tag_start);

    Ok(EncryptedKey {
        encrypted_data: SecretBox::new(Box::new(in_out)),
        nonce: nonce_bytes.to_vec(),
        tag,
    })
}

/// Decrypt private key with AES-256-GCM.
#[instrument(skip_all)]
pub fn decrypt_private_key(
    encrypted: &EncryptedKey,
    master_key: &[u8],
) -> Result<SecretBox<Vec<u8>>, TokenError> {
    check_master_key(master_key)?;

    let nonce_bytes: [u8; 12] = encrypted.nonce.as_slice().try_into().map_err(|_| {
        TokenError::Crypto(format!(
            "Invalid nonce length: {} (expected 12)",
            encrypted.nonce.len()
        ))
    })?;

    if encrypted.tag.len() != 16 {
        return Err(TokenError::Crypto(format!(
            "Invalid tag length: {} (expected 16)",
            encrypted.tag.len()
        )));
    }

    let mut in_out = encrypted.encrypted_data.expose_secret().clone();
    in_out.extend_from_slice(&encrypted.tag);

    let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
        .map_err(|e| TokenError::Crypto(format!("Cipher key creation failed: {}", e)))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let decrypted = opening_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|e| TokenError::Crypto(format!("Decryption operation failed: {}", e)))?;

    Ok(SecretBox::new(Box::new(decrypted.to_vec())))
}

fn check_master_key(master_key: &[u8]) -> Result<(), TokenError> {
    if master_key.len() != 32 {
        return Err(TokenError::Crypto(format!(
            "Invalid master key length: {} (expected 32)",
            master_key.len()
        )));
    }
    Ok(())
}

/// Build a signing key from a PKCS#8 document, rejecting anything that is not Ed25519.
pub fn encoding_key_from_pkcs8(private_key_pkcs8: &[u8]) -> Result<EncodingKey, TokenError> {
    Ed25519KeyPair::from_pkcs8_maybe_unchecked(private_key_pkcs8)
        .map_err(|e| TokenError::Crypto(format!("Invalid private key format: {}", e)))?;

    Ok(EncodingKey::from_ed_der(private_key_pkcs8))
}

/// Build a verification key from the stored public key PEM.
pub fn decoding_key_from_pem(public_key_pem: &str) -> Result<DecodingKey, TokenError> {
    let public_key_bytes = decode_ed25519_public_key_pem(public_key_pem)
        .map_err(|e| TokenError::Crypto(format!("Invalid public key encoding: {}", e)))?;

    if public_key_bytes.len() != 32 {
        return Err(TokenError::Crypto(format!(
            "Invalid public key length: {} (expected 32)",
            public_key_bytes.len()
        )));
    }

    Ok(DecodingKey::from_ed_der(&public_key_bytes))
}

/// Sign claims as an EdDSA JWT carrying `kid` in the header.
#[instrument(skip_all)]
pub fn sign_claims(
    claims: &Claims,
    encoding_key: &EncodingKey,
    key_id: &str,
) -> Result<String, TokenError> {
    let mut header = Header::new(Algorithm::EdDSA);
    header.typ = Some("JWT".to_string());
    header.kid = Some(key_id.to_string());

    encode(&header, claims, encoding_key)
        .map_err(|e| TokenError::Crypto(format!("JWT signing operation failed: {}", e)))
}

/// Verify a JWT signature and decode its claims.
///
/// Expiry is NOT checked here: callers check `exp` against their own clock so
/// an expired token is reported as expired rather than as a decode failure.
#[instrument(skip_all)]
pub fn verify_signature(token: &str, decoding_key: &DecodingKey) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_aud = false;

    let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "token.crypto", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat => TokenError::BadSignature,
            _ => TokenError::MalformedToken,
        }
    })?;

    Ok(token_data.claims)
}

/// Generate cryptographically secure random bytes
pub fn generate_random_bytes(len: usize) -> Result<Vec<u8>, TokenError> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|e| TokenError::Crypto(format!("Random bytes generation failed: {}", e)))?;
    Ok(bytes)
}

/// Generate an opaque authorization code (256 bits, base64url without padding).
#[instrument(skip_all)]
pub fn generate_authorization_code() -> Result<SecretString, TokenError> {
    let bytes = generate_random_bytes(AUTH_CODE_BYTES)?;
    Ok(SecretString::from(
        general_purpose::URL_SAFE_NO_PAD.encode(&bytes),
    ))
}

/// SHA-256 digest of an authorization code, hex encoded. Only digests are stored.
pub fn hash_authorization_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
