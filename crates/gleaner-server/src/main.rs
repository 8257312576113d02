use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use gleaner_core::ScraperConfig;
use gleaner_server::routes;
use gleaner_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gleaner=info".parse()?))
        .with_target(false)
        .init();

    let api_key = std::env::var("GLEANER_SERVER_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!("GLEANER_SERVER_API_KEY not set, /v1 endpoints are unauthenticated");
    }
    let port = std::env::var("GLEANER_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let config = ScraperConfig::from_env().context("Invalid GLEANER_* configuration")?;
    let state = Arc::new(AppState::new(config, api_key).context("Failed to build scrape pipeline")?);

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
