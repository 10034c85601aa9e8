//! Key rotation background task.
//!
//! Checks several times per rotation interval whether the current signing key
//! is due for replacement, so a missed tick or a restart never delays a
//! rotation by a full interval. Each pass also prunes keys past `not_after`.

use crate::config::Config;
use crate::services::key_store::KeyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// Number of rotation checks per rotation interval.
pub const CHECKS_PER_INTERVAL: u32 = 24;

/// Lower bound on the check period.
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct KeyRotationConfig {
    pub check_interval: Duration,
}

impl KeyRotationConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_interval: (config.key_rotation_interval / CHECKS_PER_INTERVAL)
                .max(MIN_CHECK_INTERVAL),
        }
    }
}

/// Run the key rotation loop until `cancel_token` fires.
pub async fn start_key_rotation(
    key_store: Arc<KeyStore>,
    config: KeyRotationConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "token.task.key_rotation",
        check_interval_secs = config.check_interval.as_secs(),
        "Key rotation task started"
    );

    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_key_rotation(&key_store)
                    .instrument(tracing::info_span!("token.task.key_rotation"))
                    .await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "token.task.key_rotation",
                    "Key rotation task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// One rotation pass. Failures are logged and retried on the next tick.
pub async fn run_key_rotation(key_store: &KeyStore) {
    match key_store.rotate_if_due().await {
        Ok(Some(key)) => {
            info!(
                target: "token.task.key_rotation",
                key_id = %key.key_id,
                "Scheduled key rotation complete"
            );
        }
        Ok(None) => {}
        Err(e) => {
            warn!(
                target: "token.task.key_rotation",
                error = %e,
                "Scheduled key rotation failed"
            );
        }
    }

    if let Err(e) = key_store.prune_expired().await {
        warn!(
            target: "token.task.key_rotation",
            error = %e,
            "Failed to prune expired signing keys"
        );
    }
}
