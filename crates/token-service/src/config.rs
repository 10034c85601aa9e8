use base64::{engine::general_purpose, Engine as _};
use common::config::ObservabilityConfig;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretBox;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_KEY_ID_PREFIX: &str = "inkgate";
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 900; // 15 minutes
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 14 * 24 * 3600; // 14 days
pub const DEFAULT_AUTH_CODE_TTL_SECONDS: u64 = 60;
pub const DEFAULT_KEY_ROTATION_INTERVAL_SECONDS: u64 = 7 * 24 * 3600; // weekly
pub const DEFAULT_KEY_VALIDITY_SECONDS: u64 = 30 * 24 * 3600;
pub const DEFAULT_PERSISTENCE_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 3600;

/// Authorization codes are meant to be exchanged immediately.
pub const MAX_AUTH_CODE_TTL_SECONDS: u64 = 600;

#[derive(Debug)]
pub struct Config {
    /// AES-256-GCM key that wraps signing-key private material.
    pub master_key: SecretBox<Vec<u8>>,
    pub key_id_prefix: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub auth_code_ttl: Duration,
    pub key_rotation_interval: Duration,
    /// Lifetime of each signing key (notAfter - notBefore).
    pub key_validity: Duration,
    pub clock_skew: Duration,
    /// Per-attempt timeout for persistence calls.
    pub persistence_timeout: Duration,
    pub sweep_interval: Duration,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid master key format: {0}")]
    InvalidMasterKey(String),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let master_key_base64 = vars
            .get("TOKEN_MASTER_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("TOKEN_MASTER_KEY".to_string()))?;

        let master_key = general_purpose::STANDARD
            .decode(master_key_base64.trim())
            .map_err(ConfigError::Base64Error)?;

        if master_key.len() != 32 {
            return Err(ConfigError::InvalidMasterKey(format!(
                "Expected 32 bytes, got {}",
                master_key.len()
            )));
        }

        let key_id_prefix = vars
            .get("KEY_ID_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEY_ID_PREFIX.to_string());

        if key_id_prefix.is_empty()
            || !key_id_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                name: "KEY_ID_PREFIX".to_string(),
                reason: "must be non-empty and contain only [A-Za-z0-9_-]".to_string(),
            });
        }

        let access_token_ttl = seconds_var(
            vars,
            "ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        )?;
        let refresh_token_ttl = seconds_var(
            vars,
            "REFRESH_TOKEN_TTL_SECONDS",
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        )?;
        let auth_code_ttl = seconds_var(vars, "AUTH_CODE_TTL_SECONDS", DEFAULT_AUTH_CODE_TTL_SECONDS)?;
        let key_rotation_interval = seconds_var(
            vars,
            "KEY_ROTATION_INTERVAL_SECONDS",
            DEFAULT_KEY_ROTATION_INTERVAL_SECONDS,
        )?;
        let key_validity = seconds_var(vars, "KEY_VALIDITY_SECONDS", DEFAULT_KEY_VALIDITY_SECONDS)?;
        let clock_skew = seconds_var(
            vars,
            "JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        let sweep_interval = seconds_var(
            vars,
            "SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let persistence_timeout = Duration::from_millis(positive_u64_var(
            vars,
            "PERSISTENCE_TIMEOUT_MS",
            DEFAULT_PERSISTENCE_TIMEOUT_MS,
        )?);

        if auth_code_ttl > Duration::from_secs(MAX_AUTH_CODE_TTL_SECONDS) {
            return Err(ConfigError::InvalidValue {
                name: "AUTH_CODE_TTL_SECONDS".to_string(),
                reason: format!("must be at most {MAX_AUTH_CODE_TTL_SECONDS}"),
            });
        }

        if access_token_ttl > refresh_token_ttl {
            return Err(ConfigError::InvalidValue {
                name: "ACCESS_TOKEN_TTL_SECONDS".to_string(),
                reason: format!(
                    "must not exceed REFRESH_TOKEN_TTL_SECONDS ({})",
                    refresh_token_ttl.as_secs()
                ),
            });
        }

        if clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidValue {
                name: "JWT_CLOCK_SKEW_SECONDS".to_string(),
                reason: format!("must be at most {}", MAX_CLOCK_SKEW.as_secs()),
            });
        }

        // A key rotated out at the end of its interval still has to verify
        // the last refresh token it signed.
        let required_validity = key_rotation_interval.saturating_add(refresh_token_ttl);
        if key_validity < required_validity {
            return Err(ConfigError::InvalidValue {
                name: "KEY_VALIDITY_SECONDS".to_string(),
                reason: format!(
                    "must be at least KEY_ROTATION_INTERVAL_SECONDS + REFRESH_TOKEN_TTL_SECONDS ({})",
                    required_validity.as_secs()
                ),
            });
        }

        Ok(Config {
            master_key: SecretBox::new(Box::new(master_key)),
            key_id_prefix,
            access_token_ttl,
            refresh_token_ttl,
            auth_code_ttl,
            key_rotation_interval,
            key_validity,
            clock_skew,
            persistence_timeout,
            sweep_interval,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }
}

fn seconds_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    positive_u64_var(vars, name, default).map(Duration::from_secs)
}

fn positive_u64_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: format!("expected a positive integer, got {raw:?}"),
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(value)
}
