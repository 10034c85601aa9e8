//! Background tasks for the token authority.
//!
//! # Tasks
//!
//! - `key_rotation` - Rotates the signing key when due and prunes expired keys
//! - `ledger_sweep` - Removes expired revocations, token metadata, chains and codes
//!
//! Both stop when their cancellation token is triggered.

pub mod key_rotation;
pub mod ledger_sweep;

pub use key_rotation::{start_key_rotation, KeyRotationConfig};
pub use ledger_sweep::{start_ledger_sweep, LedgerSweepConfig};
