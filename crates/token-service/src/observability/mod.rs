//! Observability for the token authority.
//!
//! # Privacy by Default
//!
//! Service entry points use `#[instrument(skip_all)]` and add fields
//! explicitly. Fields fall into three groups:
//! - **SAFE**: logged as-is (token ids, key ids, chain ids, kinds, reasons)
//! - **HASHED**: logged via [`hash_for_correlation`] (subjects, client ids)
//! - **NEVER**: encoded tokens, authorization codes, key material

pub mod metrics;

use crate::errors::TokenError;
use sha2::{Digest, Sha256};

/// Hash a field value for correlation in logs (SHA-256, first 8 hex chars)
///
/// This is a one-way hash for correlation only, not protection for secrets.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}

/// Error categories for metrics labels (bounded cardinality)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The presented credential is not acceptable (expired, revoked, reused)
    Authentication,
    /// The request asks for more than was granted
    Authorization,
    /// Signature, key or encoding failures
    Cryptographic,
    /// Persistence and other internal failures
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Authorization => "authorization",
            ErrorCategory::Cryptographic => "cryptographic",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl From<&TokenError> for ErrorCategory {
    fn from(err: &TokenError) -> Self {
        match err {
            TokenError::Expired
            | TokenError::Revoked
            | TokenError::ReuseDetected
            | TokenError::NotYetValid
            | TokenError::InvalidGrant(_)
            | TokenError::NotFound(_) => ErrorCategory::Authentication,
            TokenError::InvalidScope { .. } => ErrorCategory::Authorization,
            TokenError::UnknownKey { .. }
            | TokenError::BadSignature
            | TokenError::MalformedToken
            | TokenError::Crypto(_) => ErrorCategory::Cryptographic,
            TokenError::PersistenceUnavailable(_) => ErrorCategory::Internal,
        }
    }
}
