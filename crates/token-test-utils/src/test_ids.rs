//! Fixed test IDs for deterministic tests
//!
//! All test IDs are deterministic to ensure reproducible test results.

use common::types::{ChainId, TokenId};
use uuid::Uuid;

// Token IDs (1-99)
pub const TEST_TOKEN_ID_1: TokenId = TokenId(Uuid::from_u128(1));
pub const TEST_TOKEN_ID_2: TokenId = TokenId(Uuid::from_u128(2));

// Chain IDs (100-199)
pub const TEST_CHAIN_ID_1: ChainId = ChainId(Uuid::from_u128(100));
pub const TEST_CHAIN_ID_2: ChainId = ChainId(Uuid::from_u128(101));

// Subjects
pub const TEST_SUBJECT_ALICE: &str = "reader-alice";
pub const TEST_SUBJECT_BOB: &str = "reader-bob";
pub const TEST_SUBJECT_UNKNOWN: &str = "reader-nobody";

// Signing Key IDs (strings)
pub const TEST_KEY_ID_1: &str = "inkgate-20260101000000-0000aaaa";
pub const TEST_KEY_ID_2: &str = "inkgate-20260108000000-0000bbbb";

// Client IDs
pub const TEST_CLIENT_WEB: &str = "web-test-client";
pub const TEST_CLIENT_MOBILE: &str = "mobile-test-client";

// Test scopes
pub const SCOPE_STORIES_READ: &str = "stories:read";
pub const SCOPE_STORIES_WRITE: &str = "stories:write";
pub const SCOPE_COMMENTS_WRITE: &str = "comments:write";
pub const SCOPE_ADMIN: &str = "admin";

/// 2026-01-01T00:00:00Z, the harness clock's starting point.
pub const TEST_EPOCH_SECONDS: i64 = 1_767_225_600;
