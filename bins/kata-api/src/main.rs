mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use kata_common::config::RunnerConfig;
use kata_engine::ExecutionCoordinator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

pub struct AppState {
    pub coordinator: ExecutionCoordinator,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new().merge(routes::routes()).with_state(state)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("KATA_LOG_JSON").map(|v| v == "1").unwrap_or(false) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Kata API booting...");

    let config = RunnerConfig::load_default().context("Failed to load runner configuration")?;
    info!(
        interpreter = %config.interpreter.command,
        timeout_ms = config.timeout_ms,
        scratch_dir = %config.scratch_dir.display(),
        in_program_timeout = config.in_program_timeout,
        "Runner configured"
    );

    let state = Arc::new(AppState {
        coordinator: ExecutionCoordinator::from_config(&config),
    });

    let addr = std::env::var("KATA_API_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app(state)).await.context("Server error")?;

    Ok(())
}
