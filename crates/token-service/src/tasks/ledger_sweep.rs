//! Maintenance sweep background task.
//!
//! Keeps storage bounded: revocation entries, token metadata, refresh chains
//! and authorization codes are only needed until their natural expiry.

use crate::config::Config;
use crate::services::TokenAuthority;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, Copy)]
pub struct LedgerSweepConfig {
    pub sweep_interval: Duration,
}

impl LedgerSweepConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: config.sweep_interval,
        }
    }
}

/// Run the sweep loop until `cancel_token` fires.
pub async fn start_ledger_sweep(
    authority: Arc<TokenAuthority>,
    config: LedgerSweepConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "token.task.ledger_sweep",
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Ledger sweep task started"
    );

    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_ledger_sweep(&authority)
                    .instrument(tracing::info_span!("token.task.ledger_sweep"))
                    .await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "token.task.ledger_sweep",
                    "Ledger sweep task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// One sweep pass. Returns the number of removed records.
pub async fn run_ledger_sweep(authority: &TokenAuthority) -> u64 {
    let now = authority.clock().now();
    match authority.sweep(now).await {
        Ok(report) => {
            debug!(
                target: "token.task.ledger_sweep",
                removed = report.total(),
                "Sweep pass finished"
            );
            report.total()
        }
        Err(e) => {
            warn!(
                target: "token.task.ledger_sweep",
                error = %e,
                "Sweep pass failed, will retry next interval"
            );
            0
        }
    }
}
