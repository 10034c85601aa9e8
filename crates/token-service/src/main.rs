//! Inkgate token authority
//!
//! Runs the token core on the in-memory backend with its maintenance tasks.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON)
//! 3. Initialize the Prometheus exporter if `METRICS_BIND_ADDRESS` is set
//! 4. Build the authority and make sure a signing key exists
//! 5. Spawn key rotation and ledger sweep tasks
//! 6. Wait for shutdown signal, then cancel the tasks

use std::net::SocketAddr;
use std::sync::Arc;

use common::config::LogFormat;
use token_service::clock::SystemClock;
use token_service::config::Config;
use token_service::observability::metrics::init_metrics_exporter;
use token_service::repositories::Stores;
use token_service::services::TokenAuthority;
use token_service::tasks::{
    start_key_rotation, start_ledger_sweep, KeyRotationConfig, LedgerSweepConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes first so LOG_FORMAT can pick the layer
    let config = Config::from_env()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "token_service={level},token_authority={level}",
            level = config.observability.log_level
        ))
    });
    let registry = tracing_subscriber::registry().with(filter);
    match config.observability.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        key_id_prefix = %config.key_id_prefix,
        access_token_ttl_secs = config.access_token_ttl.as_secs(),
        refresh_token_ttl_secs = config.refresh_token_ttl.as_secs(),
        key_rotation_interval_secs = config.key_rotation_interval.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        "Starting token authority"
    );

    if let Some(address) = &config.observability.metrics_bind_address {
        let addr: SocketAddr = address.parse().map_err(|e| {
            error!(address = %address, error = %e, "Invalid metrics bind address");
            e
        })?;
        init_metrics_exporter(addr).map_err(|e| {
            error!(error = %e, "Failed to install Prometheus exporter");
            e
        })?;
        info!(address = %addr, "Prometheus exporter listening");
    }

    let authority = Arc::new(TokenAuthority::new(
        &config,
        Stores::in_memory(),
        Arc::new(SystemClock),
    ));

    let current = authority.initialize().await.map_err(|e| {
        error!(error = %e, "Failed to initialize signing key");
        e
    })?;
    info!(key_id = %current.key_id, "Signing key ready");

    let cancel_token = CancellationToken::new();

    let rotation_handle = tokio::spawn(start_key_rotation(
        Arc::clone(authority.key_store()),
        KeyRotationConfig::from_config(&config),
        cancel_token.child_token(),
    ));
    let sweep_handle = tokio::spawn(start_ledger_sweep(
        Arc::clone(&authority),
        LedgerSweepConfig::from_config(&config),
        cancel_token.child_token(),
    ));

    shutdown_signal().await;
    info!("Shutdown signal received, stopping background tasks");
    cancel_token.cancel();

    for (name, handle) in [("key_rotation", rotation_handle), ("ledger_sweep", sweep_handle)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    info!("Token authority stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the process
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
