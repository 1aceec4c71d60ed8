//! Startup helpers for the chat relay server.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use crate::domain::config::RelayConfig;
use crate::server::{self, AppState};
use crate::session::{SessionSweeper, SweeperConfig};

/// Run the relay until Ctrl+C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();
    tracing::info!("Starting chat relay v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(serve()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Relay stopped with error: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Initialize tracing from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if configuration or state creation fails.
pub fn initialize() -> anyhow::Result<Arc<AppState>> {
    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    tracing::info!(
        backend = %config.backend.base_url,
        model = %config.backend.model,
        policy = ?config.orchestrator.failure_policy,
        "Relay configured"
    );
    AppState::new(config).context("failed to create application state")
}

async fn serve() -> anyhow::Result<()> {
    let state = initialize()?;

    let sweeper = SessionSweeper::new(
        Arc::clone(state.store()),
        SweeperConfig::from(&state.config.session),
    );
    let stop_sweeper = sweeper.shutdown_notifier();
    let sweeper_handle = sweeper.spawn();

    let result = server::run_server_with_shutdown(state, shutdown_signal()).await;

    stop_sweeper.notify_one();
    if let Err(e) = sweeper_handle.await {
        tracing::warn!("Session sweeper ended abnormally: {e}");
    }

    result.map_err(|e| anyhow::anyhow!(e)).context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
