use thiserror::Error;

/// Errors returned by the token authority.
///
/// Messages are safe to surface to callers: they never carry token contents,
/// subjects or key material. Transport mapping is left to the HTTP layer, which
/// should branch on the variant or on [`TokenError::code`].
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Requested scopes exceed the subject's grants: {missing:?}")]
    InvalidScope { missing: Vec<String> },

    #[error("Token was signed by an unknown key")]
    UnknownKey { key_id: String },

    #[error("Token signature is invalid")]
    BadSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Refresh token or authorization code was reused; the grant has been revoked")]
    ReuseDetected,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Token is malformed")]
    MalformedToken,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),
}

impl TokenError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::InvalidScope { .. } => "invalid_scope",
            TokenError::UnknownKey { .. } => "unknown_key",
            TokenError::BadSignature => "bad_signature",
            TokenError::Expired => "expired",
            TokenError::Revoked => "revoked",
            TokenError::ReuseDetected => "reuse_detected",
            TokenError::NotFound(_) => "not_found",
            TokenError::PersistenceUnavailable(_) => "persistence_unavailable",
            TokenError::MalformedToken => "malformed_token",
            TokenError::NotYetValid => "not_yet_valid",
            TokenError::InvalidGrant(_) => "invalid_grant",
            TokenError::Crypto(_) => "crypto_error",
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TokenError::PersistenceUnavailable(_))
    }
}
