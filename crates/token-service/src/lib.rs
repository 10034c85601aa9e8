//! Inkgate token authority library
//!
//! Token core of an OAuth 2.0 authorization server: signing-key rotation,
//! token issuance and validation, revocation, and the authorization-code and
//! refresh-token grants.
//!
//! # Modules
//!
//! - `clock` - Injectable time source
//! - `config` - Service configuration
//! - `crypto` - Key generation, key encryption, JWT signing
//! - `errors` - Error types
//! - `models` - Domain types
//! - `observability` - Log correlation and metrics
//! - `repositories` - Persistence ports and the in-memory backend
//! - `services` - Business logic layer
//! - `tasks` - Background maintenance tasks

pub mod clock;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod services;
pub mod tasks;
