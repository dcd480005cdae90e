//! HTTP surface of the gateway.

pub mod handlers;

use crate::analysis::StatsAggregator;
use crate::config::Config;
use crate::models::PlatformStats;
use crate::upstream::{AnalysisClient, AnalysisSettings, CompletionClient, CompletionSettings};
use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub analysis: AnalysisClient,
    pub completion: CompletionClient,
    pub stats: Arc<StatsAggregator>,
    /// Per-chunk idle limit for chat streams.
    pub idle_timeout: Option<Duration>,
}

impl AppState {
    /// Build the clients and the seeded aggregator from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            analysis: AnalysisClient::new(AnalysisSettings::from(&config.analysis))?,
            completion: CompletionClient::new(CompletionSettings::from(&config.completion))?,
            stats: Arc::new(StatsAggregator::new(PlatformStats::from(&config.stats))),
            idle_timeout: config
                .completion
                .idle_timeout_seconds
                .map(Duration::from_secs),
        })
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api/health", get(handlers::health))
        .route("/api/chat", post(handlers::chat))
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/token/:address", get(handlers::token_info))
        .route("/api/stats", get(handlers::stats))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Graph agent: {}", state.analysis.base_url());
    info!(
        "Chatbot: {}",
        if state.completion.is_configured() {
            "configured"
        } else {
            "not configured"
        }
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
