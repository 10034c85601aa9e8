//! Business logic layer.
//!
//! Leaf-first: [`key_store`], [`token_issuer`], [`revocation_ledger`] and
//! [`token_validator`] are composed by [`grant_coordinator`], and everything
//! is wired together behind [`TokenAuthority`].

pub mod authority;
pub mod grant_coordinator;
pub mod key_store;
pub mod revocation_ledger;
pub mod token_issuer;
pub mod token_validator;

pub use authority::TokenAuthority;
