//! # Token Test Utilities
//!
//! Shared test utilities for the Inkgate token authority.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed keys for reproducible tests)
//! - Test data builders (`TestClaimsBuilder` for forged tokens)
//! - Authority harness (`TestAuthority` on a manual clock)
//! - Fault-injecting persistence (`FlakyStore`)
//! - Fixed test IDs (subjects, clients, scopes)
//! - Custom assertions (`TokenAssertions` trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use token_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestAuthority::spawn().await?;
//!     let pair = harness.login(TEST_SUBJECT_ALICE, SCOPE_STORIES_READ).await?;
//!
//!     pair.access_token
//!         .assert_valid_jwt()
//!         .assert_has_scope(SCOPE_STORIES_READ)
//!         .assert_for_subject(TEST_SUBJECT_ALICE);
//! }
//! ```

pub mod assertions;
pub mod authority_harness;
pub mod crypto_fixtures;
pub mod fault_injection;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use authority_harness::*;
pub use crypto_fixtures::*;
pub use fault_injection::*;
pub use test_ids::*;
pub use token_builders::*;
