//! Metrics definitions for the token authority
//!
//! All metrics follow Prometheus naming conventions:
//! - `token_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 2 values (access, refresh)
//! - `status`: success, error, or a small fixed outcome set
//! - `error_category`: 4 values (authentication, authorization, cryptographic, internal)
//! - `reason`: 5 revocation reasons
//! - `operation`: bounded by code

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and serve `/metrics` on `listen_addr`.
///
/// Must be called from within a Tokio runtime, before any metric is recorded.
///
/// # Errors
///
/// Returns error if the recorder is already installed or the listener fails to bind.
pub fn init_metrics_exporter(listen_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        // Issuance/validation are in-process signature operations
        .set_buckets_for_metric(
            Matcher::Prefix("token_issuance".to_string()),
            &[0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250],
        )
        .map_err(|e| format!("Failed to set issuance buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("token_validation".to_string()),
            &[0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050],
        )
        .map_err(|e| format!("Failed to set validation buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus metrics exporter: {e}"))
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Record token issuance duration and outcome
///
/// Metric: `token_issuance_duration_seconds`, `token_issuance_total`
/// Labels: `kind`, `status`
pub fn record_token_issuance(kind: &str, status: &str, duration: Duration) {
    histogram!("token_issuance_duration_seconds", "kind" => kind.to_string(), "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("token_issuance_total", "kind" => kind.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record token validation result
///
/// Metric: `token_validation_duration_seconds`, `token_validations_total`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>, duration: Duration) {
    let category = error_category.unwrap_or("none");
    histogram!("token_validation_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());
    counter!("token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

// ============================================================================
// Key Management Metrics
// ============================================================================

/// Record key rotation event
///
/// Metric: `token_key_rotation_total`
/// Labels: `status`
pub fn record_key_rotation(status: &str) {
    counter!("token_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Update the number of keys currently valid for verification
///
/// Metric: `token_active_signing_keys`
pub fn set_active_signing_keys(count: usize) {
    // Key counts stay far below 2^52
    #[allow(clippy::cast_precision_loss)]
    gauge!("token_active_signing_keys").set(count as f64);
}

/// Record a verification-cache miss
///
/// Metric: `token_key_cache_reloads_total`
/// Labels: `outcome` (found, missing, throttled)
pub fn record_key_cache_reload(outcome: &str) {
    counter!("token_key_cache_reloads_total", "outcome" => outcome.to_string()).increment(1);
}

// ============================================================================
// Grant Metrics
// ============================================================================

/// Record an authorization-code exchange
///
/// Metric: `token_code_exchanges_total`
/// Labels: `status` (success, invalid, replayed, error)
pub fn record_code_exchange(status: &str) {
    counter!("token_code_exchanges_total", "status" => status.to_string()).increment(1);
}

/// Record a refresh attempt
///
/// Metric: `token_refresh_total`
/// Labels: `status` (success, reuse_detected, error)
pub fn record_refresh_outcome(status: &str) {
    counter!("token_refresh_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Revocation Metrics
// ============================================================================

/// Record a new revocation entry
///
/// Metric: `token_revocations_total`
/// Labels: `target` (token, chain), `reason`
pub fn record_revocation(target: &str, reason: &str) {
    counter!("token_revocations_total", "target" => target.to_string(), "reason" => reason.to_string())
        .increment(1);
}

/// Record records removed by a maintenance sweep
///
/// Metric: `token_sweep_removed_total`
/// Labels: `store` (revocations, tokens, chains, codes, keys)
pub fn record_sweep(store: &str, removed: u64) {
    counter!("token_sweep_removed_total", "store" => store.to_string()).increment(removed);
}

// ============================================================================
// Persistence Metrics
// ============================================================================

/// Record a retried persistence call
///
/// Metric: `token_persistence_retries_total`
/// Labels: `operation`
pub fn record_persistence_retry(operation: &str) {
    counter!("token_persistence_retries_total", "operation" => operation.to_string()).increment(1);
}

// ============================================================================
// Error Metrics
// ============================================================================

/// Record error by category
///
/// Metric: `token_errors_total`
/// Labels: `operation`, `error_category`, `code`
pub fn record_error(operation: &str, error_category: &str, code: &str) {
    counter!("token_errors_total",
        "operation" => operation.to_string(),
        "error_category" => error_category.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}
