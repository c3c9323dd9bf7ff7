mod archive;
mod backoff;
mod concepts;
mod config;
mod error;
mod gemini;
mod images;
mod models;
mod orchestrator;
mod routes;
#[cfg(test)]
mod testing;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::gemini::GeminiClient;
use crate::orchestrator::Orchestrator;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    tracing::info!(
        concept_model = %config.gemini.concept_model,
        image_model = %config.gemini.image_model,
        "Using API key: {}...",
        config.gemini.api_key.chars().take(6).collect::<String>()
    );

    let gemini = Arc::new(GeminiClient::new(&config.gemini));
    let state = AppState {
        orchestrator: Arc::new(Orchestrator::new(gemini, config.image_backoff)),
    };
    let app = router(state, config.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
}
