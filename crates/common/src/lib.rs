//! Common utilities and types shared across Inkgate components.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, header inspection, iat checks)
pub mod jwt;
