//! Builder patterns for test data construction
//!
//! Provides a fluent API for wire claims, used to forge tokens the authority
//! never issued (future `iat`, foreign keys, bogus ids).

use chrono::{DateTime, Duration, Utc};
use common::types::{ChainId, TokenId};
use token_service::crypto::Claims;
use token_service::models::TokenKind;

/// Builder for test JWT claims
///
/// # Example
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new(harness.now())
///     .for_subject("reader-alice")
///     .with_scope("stories:read")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestClaimsBuilder {
    jti: String,
    sub: String,
    scope: String,
    iat: i64,
    exp: i64,
    kind: TokenKind,
    cid: Option<String>,
}

impl TestClaimsBuilder {
    /// Access-token claims issued at `now`, valid for an hour.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            jti: TokenId::new().to_string(),
            sub: "test-subject".to_string(),
            scope: String::new(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            kind: TokenKind::Access,
            cid: None,
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set the scope (space-separated)
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    pub fn with_token_id(mut self, token_id: TokenId) -> Self {
        self.jti = token_id.to_string();
        self
    }

    /// Set a raw `jti`, including values that are not UUIDs
    pub fn with_raw_jti(mut self, jti: &str) -> Self {
        self.jti = jti.to_string();
        self
    }

    pub fn refresh_in_chain(mut self, chain_id: ChainId) -> Self {
        self.kind = TokenKind::Refresh;
        self.cid = Some(chain_id.to_string());
        self
    }

    /// Set expiration relative to `iat`
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = self.iat + seconds;
        self
    }

    /// Set issued-at timestamp (keeps the lifetime)
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        let lifetime = self.exp - self.iat;
        self.iat = timestamp;
        self.exp = timestamp + lifetime;
        self
    }

    pub fn build(self) -> Claims {
        Claims {
            jti: self.jti,
            sub: self.sub,
            scope: self.scope,
            iat: self.iat,
            exp: self.exp,
            kind: self.kind,
            cid: self.cid,
        }
    }
}
