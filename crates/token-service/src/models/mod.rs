use crate::crypto::{Claims, EncryptedKey};
use crate::errors::TokenError;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{ChainId, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// A set of scope strings. Ordered so the encoded claim is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a space-separated scope string, ignoring repeated whitespace.
    pub fn parse(scope: &str) -> Self {
        scope.split_whitespace().collect()
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_subset(&self, other: &ScopeSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Scopes in `self` that `granted` does not contain.
    pub fn missing_from(&self, granted: &ScopeSet) -> Vec<String> {
        self.0.difference(&granted.0).cloned().collect()
    }

    pub fn union(&self, other: &ScopeSet) -> ScopeSet {
        ScopeSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Space-separated form used in the `scope` claim and OAuth responses.
    pub fn to_claim(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ScopeSet(
            iter.into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        )
    }
}

/// An issued token. Immutable once minted.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub token_id: TokenId,
    pub subject: String,
    pub scopes: ScopeSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub key_id: String,
    pub kind: TokenKind,
    pub chain_id: Option<ChainId>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_id", &self.token_id)
            .field("subject", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("key_id", &self.key_id)
            .field("kind", &self.kind)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl Token {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn to_claims(&self) -> Claims {
        Claims {
            jti: self.token_id.to_string(),
            sub: self.subject.clone(),
            scope: self.scopes.to_claim(),
            iat: self.issued_at.timestamp(),
            exp: self.expires_at.timestamp(),
            kind: self.kind,
            cid: self.chain_id.map(|c| c.to_string()),
        }
    }

    /// Rebuild a token from verified claims and the `kid` it was verified with.
    pub fn from_claims(claims: Claims, key_id: &str) -> Result<Self, TokenError> {
        let token_id = claims
            .jti
            .parse::<TokenId>()
            .map_err(|_| TokenError::MalformedToken)?;
        let chain_id = claims
            .cid
            .as_deref()
            .map(str::parse::<ChainId>)
            .transpose()
            .map_err(|_| TokenError::MalformedToken)?;
        let issued_at =
            DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::MalformedToken)?;
        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::MalformedToken)?;

        Ok(Token {
            token_id,
            subject: claims.sub,
            scopes: ScopeSet::parse(&claims.scope),
            issued_at,
            expires_at,
            key_id: key_id.to_string(),
            kind: claims.kind,
            chain_id,
        })
    }
}

/// A token together with its signed compact encoding.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: Token,
    pub encoded: String,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &self.token)
            .field("encoded", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Signing keys
// ============================================================================

#[derive(Debug, Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub algorithm: String,
    pub public_key_pem: String,
    pub private_key: EncryptedKey,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SigningKey {
    /// Whether tokens may be verified with this key at `at` (notBefore inclusive, notAfter exclusive).
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at < self.not_after
    }
}

/// JWKS (JSON Web Key Set) response, RFC 7517.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

/// A single Ed25519 public key (RFC 8037 OKP form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
}

// ============================================================================
// Refresh chains
// ============================================================================

/// The rotation history of one grant. `version` is the compare-and-swap operand.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshChain {
    pub chain_id: ChainId,
    pub subject: String,
    pub client_id: String,
    pub scopes: ScopeSet,
    pub current_token_id: TokenId,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// Expiry of the current refresh token
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<RevocationReason>,
}

impl fmt::Debug for RefreshChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshChain")
            .field("chain_id", &self.chain_id)
            .field("subject", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("current_token_id", &self.current_token_id)
            .field("version", &self.version)
            .field("expires_at", &self.expires_at)
            .field("revoked", &self.revoked)
            .field("revocation_reason", &self.revocation_reason)
            .finish()
    }
}

/// Expected state for a refresh-chain rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSwap {
    pub chain_id: ChainId,
    pub expected_version: u64,
    pub expected_token_id: TokenId,
    pub new_token_id: TokenId,
    pub new_expires_at: DateTime<Utc>,
}

/// Result of a refresh-chain compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The chain now points at the new token.
    Swapped(RefreshChain),
    /// Another rotation won; the chain has moved on.
    Conflict { current_version: u64 },
    /// The chain was revoked before the swap.
    Revoked,
    Missing,
}

/// Lifecycle state of a grant as seen from one presented token.
///
/// `Issued` is an authorization code awaiting exchange. `Active` is the live
/// refresh token of a chain. `Refreshed` is a refresh token that has been
/// rotated away. `Revoked` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantState {
    Issued,
    Active,
    Refreshed,
    Revoked,
    Expired,
}

impl GrantState {
    /// State of `token_id` within `chain` at `now`.
    pub fn of(chain: &RefreshChain, token_id: TokenId, now: DateTime<Utc>) -> Self {
        if chain.revoked {
            GrantState::Revoked
        } else if chain.current_token_id != token_id {
            GrantState::Refreshed
        } else if chain.expires_at <= now {
            GrantState::Expired
        } else {
            GrantState::Active
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GrantState::Revoked | GrantState::Expired)
    }

    pub fn can_transition_to(&self, next: GrantState) -> bool {
        use GrantState::*;
        matches!(
            (self, next),
            (Issued, Active)
                | (Issued, Expired)
                | (Issued, Revoked)
                | (Active, Refreshed)
                | (Active, Revoked)
                | (Active, Expired)
                | (Refreshed, Revoked)
                | (Refreshed, Expired)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GrantState::Issued => "issued",
            GrantState::Active => "active",
            GrantState::Refreshed => "refreshed",
            GrantState::Revoked => "revoked",
            GrantState::Expired => "expired",
        }
    }
}

// ============================================================================
// Revocation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationTarget {
    Token(TokenId),
    Chain(ChainId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    Explicit,
    ReuseDetected,
    Rotated,
    CodeReplay,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Logout => "logout",
            RevocationReason::Explicit => "explicit",
            RevocationReason::ReuseDetected => "reuse_detected",
            RevocationReason::Rotated => "rotated",
            RevocationReason::CodeReplay => "code_replay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    pub target: RevocationTarget,
    pub revoked_at: DateTime<Utc>,
    pub reason: RevocationReason,
    /// Natural expiry of the revoked token or chain; the entry is useless after it.
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Authorization codes
// ============================================================================

/// Stored form of an authorization code. The plaintext code is never kept.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub subject: String,
    pub client_id: String,
    pub scopes: ScopeSet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for AuthorizationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCode")
            .field("code_hash", &"[REDACTED]")
            .field("subject", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of atomically consuming an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeConsumption {
    /// First use; the code is now marked consumed.
    Fresh(AuthorizationCode),
    /// Already consumed. `chain_id` is the chain the first exchange produced, if bound yet.
    AlreadyUsed { chain_id: Option<ChainId> },
    Missing,
}

/// A freshly created authorization code, returned to the caller once.
#[derive(Debug)]
pub struct AuthorizationCodeGrant {
    pub code: SecretString,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Token responses
// ============================================================================

/// Access/refresh pair in OAuth 2.0 token response shape.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub scope: String,
    #[serde(skip)]
    pub chain_id: ChainId,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl TokenPair {
    pub fn new(access: &IssuedToken, refresh: &IssuedToken, chain_id: ChainId) -> Self {
        TokenPair {
            access_token: access.encoded.clone(),
            refresh_token: refresh.encoded.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (access.token.expires_at - access.token.issued_at).num_seconds(),
            scope: access.token.scopes.to_claim(),
            chain_id,
        }
    }
}

/// Records removed by one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub revocations: u64,
    pub tokens: u64,
    pub chains: u64,
    pub codes: u64,
    pub keys: u64,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.revocations + self.tokens + self.chains + self.codes + self.keys
    }
}
