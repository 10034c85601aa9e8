//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions on compact tokens. They inspect the
//! encoded header and claims only; signature checks belong to the validator.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// JWT claims structure
#[derive(Debug, Deserialize)]
struct JwtClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub scope: String,
    pub kind: String,
    #[serde(default)]
    pub cid: Option<String>,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT is missing segment {}", index));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {}", index, e))
}

fn header(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header")
}

fn claims(token: &str) -> JwtClaims {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims")
}

/// Custom assertions for encoded tokens
///
/// # Example
/// ```rust,ignore
/// pair.access_token
///     .assert_valid_jwt()
///     .assert_has_scope("stories:read")
///     .assert_signed_by(&key.key_id);
/// ```
pub trait TokenAssertions {
    /// Assert that the token is a well-formed EdDSA JWT
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token contains the specified scope
    fn assert_has_scope(&self, scope: &str) -> &Self;

    /// Assert that the token was signed by the specified key
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that the token lives exactly `seconds` (exp - iat)
    fn assert_lifetime(&self, seconds: i64) -> &Self;

    /// Assert that the token is for the specified subject
    fn assert_for_subject(&self, subject: &str) -> &Self;

    /// Assert the `kind` claim ("access" or "refresh")
    fn assert_kind(&self, kind: &str) -> &Self;

    /// Assert that the token belongs to a refresh chain
    fn assert_in_chain(&self, chain_id: &str) -> &Self;
}

impl TokenAssertions for str {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header = header(self);
        assert_eq!(header.alg, "EdDSA", "Expected EdDSA algorithm");
        assert_eq!(header.typ, "JWT", "Expected JWT type");
        assert!(header.kid.is_some(), "JWT header must carry a kid");

        let claims = claims(self);
        assert!(claims.exp > claims.iat, "JWT must expire after it was issued");

        self
    }

    fn assert_has_scope(&self, scope: &str) -> &Self {
        let claims = claims(self);
        let scopes: Vec<_> = claims.scope.split_whitespace().collect();
        assert!(
            scopes.contains(&scope),
            "Token does not contain scope '{}'. Available scopes: {}",
            scope,
            claims.scope
        );
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header(self);
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{}', got {:?}",
            key_id,
            header.kid
        );
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.exp - claims.iat,
            seconds,
            "Expected token lifetime of {} seconds",
            seconds
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.sub, subject,
            "Expected subject '{}', got '{}'",
            subject, claims.sub
        );
        self
    }

    fn assert_kind(&self, kind: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(claims.kind, kind, "Expected a {} token", kind);
        self
    }

    fn assert_in_chain(&self, chain_id: &str) -> &Self {
        let claims = claims(self);
        assert_eq!(
            claims.cid.as_deref(),
            Some(chain_id),
            "Expected chain '{}', got {:?}",
            chain_id,
            claims.cid
        );
        self
    }
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        self.as_str().assert_valid_jwt();
        self
    }

    fn assert_has_scope(&self, scope: &str) -> &Self {
        self.as_str().assert_has_scope(scope);
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        self.as_str().assert_signed_by(key_id);
        self
    }

    fn assert_lifetime(&self, seconds: i64) -> &Self {
        self.as_str().assert_lifetime(seconds);
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        self.as_str().assert_for_subject(subject);
        self
    }

    fn assert_kind(&self, kind: &str) -> &Self {
        self.as_str().assert_kind(kind);
        self
    }

    fn assert_in_chain(&self, chain_id: &str) -> &Self {
        self.as_str().assert_in_chain(chain_id);
        self
    }
}
