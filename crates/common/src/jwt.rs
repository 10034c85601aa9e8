//! JWT helpers shared by token issuers and verifiers.
//!
//! - Size limits applied before any parsing
//! - Clock skew constants for `iat` checks
//! - Key ID extraction from the JOSE header
//! - Ed25519 public key encoding (PEM wrapper and JWK `x` form)
//!
//! Only `EdDSA` (Ed25519) tokens are produced by Inkgate. Error messages are
//! generic; details are logged at debug level under the `common.jwt` target.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted size of a compact JWT in bytes (8KB).
///
/// Tokens issued here are ~400 bytes. Anything larger is rejected before
/// base64 decoding or signature verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default tolerance for `iat` values ahead of the verifier's clock (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Errors raised while inspecting a JWT before signature verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The token is invalid")]
    TokenTooLarge,

    /// Token is not three base64url segments with a JSON header.
    #[error("The token is invalid")]
    MalformedToken,

    /// Header has no usable `kid`.
    #[error("The token is invalid")]
    MissingKid,

    /// `iat` is further in the future than the allowed skew.
    #[error("The token is not valid yet")]
    IatTooFarInFuture,
}

/// Extract the `kid` from a JWT header without verifying the signature.
///
/// The returned key ID must only be used to select a verification key; the
/// token still has to be verified with that key.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if the token is not `header.payload.signature` or the
///   header is not base64url JSON
/// - `MissingKid` if the header has no non-empty string `kid`
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Check an `iat` claim against an explicit `now` (Unix seconds).
///
/// `iat == now + clock_skew` is the last accepted value.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` when `iat` exceeds `now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // Bounded by MAX_CLOCK_SKEW at config time
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Wrap a raw Ed25519 public key in the PEM-style envelope used for storage.
#[must_use]
pub fn encode_ed25519_public_key_pem(raw: &[u8]) -> String {
    format!(
        "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----",
        STANDARD.encode(raw)
    )
}

/// Decode an Ed25519 public key from its PEM-style envelope.
///
/// Header and footer lines are optional.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the body is not valid base64.
pub fn decode_ed25519_public_key_pem(pem: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let b64: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();

    STANDARD.decode(b64)
}

/// Encode a raw Ed25519 public key as the JWK `x` member (base64url, no padding).
#[must_use]
pub fn encode_ed25519_public_key_jwk(raw: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(raw)
}

/// Decode the JWK `x` member of an OKP key.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the value is not base64url.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}
