//! Startup helpers for the intake server.

use std::process::ExitCode;

use crate::config::AppConfig;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C, then drain queued handoffs.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting intake server v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::debug!(?config, "Configuration loaded");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(serve(config))
}

async fn serve(config: AppConfig) -> ExitCode {
    let (state, worker) = match AppState::build(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return ExitCode::from(1);
        }
    };
    let worker = worker.spawn();

    let result =
        server::run_server_with_shutdown(state, config.server.port, shutdown_signal()).await;

    tracing::info!("Draining handoff queue");
    worker.shutdown().await;

    if let Err(e) = result {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
