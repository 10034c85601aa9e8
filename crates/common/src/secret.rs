//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for signing-key material, master keys,
//! authorization codes and bearer tokens.
//!
//! `SecretBox<T>` and `SecretString` implement `Debug` with redaction, so a
//! struct that derives `Debug` and holds one of them logs safely through `{:?}`
//! and tracing. Values are zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct CodeExchange {
//!     client_id: String,
//!     code: SecretString,
//! }
//!
//! let req = CodeExchange {
//!     client_id: "reader-app".to_string(),
//!     code: SecretString::from("Zq3v9r0c"),
//! };
//!
//! assert!(!format!("{req:?}").contains("Zq3v9r0c"));
//! let code: &str = req.code.expose_secret();
//! assert_eq!(code, "Zq3v9r0c");
//! ```
//!
//! Use `SecretString` for authorization codes and compact tokens handed back to
//! callers, and `SecretBox<Vec<u8>>` for binary key material.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
