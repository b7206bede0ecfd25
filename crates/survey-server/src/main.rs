//! Survey orchestrator daemon.
//!
//! Opens the database, recovers orchestration state (executors for
//! missions that were in progress, interrupted return flights and
//! charges), then runs until a shutdown signal.

use anyhow::Result;
use std::sync::Arc;

use survey_server::bus::TelemetryBus;
use survey_server::config::Config;
use survey_server::repository::{self, Repository};
use survey_server::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("survey_server=debug".parse()?);
    let log_format = std::env::var("SURVEY_LOG_FORMAT").unwrap_or_default();
    if log_format.trim().eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    tracing::info!("Starting survey orchestrator...");
    let config = Config::from_env();

    tracing::info!("Initializing database: {}", config.database_path);
    let repo = repository::init_database(&config.database_path, config.database_max_connections)
        .await
        .map_err(|e| anyhow::anyhow!("database init failed: {e}"))?;
    let repo: Arc<dyn Repository> = Arc::new(repo);
    tracing::info!("Database initialized successfully");

    let bus = Arc::new(TelemetryBus::new());
    let supervisor = Supervisor::new(repo, bus, config);

    let resumed = supervisor
        .resume_active()
        .await
        .map_err(|e| anyhow::anyhow!("recovery failed: {e}"))?;
    tracing::info!("Resumed {} in-progress mission(s)", resumed);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    supervisor.begin_shutdown();

    // Give loops a moment to observe the signal and persist final state
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = sigterm.recv() => {},
            }
        }
        Err(err) => {
            tracing::warn!("Failed to install SIGTERM handler (CTRL-C only): {}", err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
