//! Common configuration types for Inkgate components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per line, for log shippers
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error or an `EnvFilter` spec)
    pub log_level: String,
    /// Log line format
    pub log_format: LogFormat,
    /// Address for the Prometheus scrape listener; metrics export is off when unset
    pub metrics_bind_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Text,
            metrics_bind_address: None,
        }
    }
}

impl ObservabilityConfig {
    /// Read `LOG_LEVEL`, `LOG_FORMAT` and `METRICS_BIND_ADDRESS` from a variable map.
    ///
    /// Unknown `LOG_FORMAT` values fall back to text output.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let log_level = vars
            .get("LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match vars.get("LOG_FORMAT").map(|s| s.to_ascii_lowercase()) {
            Some(f) if f == "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let metrics_bind_address = vars
            .get("METRICS_BIND_ADDRESS")
            .filter(|s| !s.trim().is_empty())
            .cloned();

        Self {
            log_level,
            log_format,
            metrics_bind_address,
        }
    }
}
