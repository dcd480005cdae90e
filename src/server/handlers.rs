//! Request handlers.
//!
//! `analyze` and `chat` sequence the core components; the rest are
//! informational endpoints.

use crate::analysis::transform;
use crate::error::GatewayError;
use crate::models::{
    AnalysisRequest, AnalysisResult, AnalyzeRequestBody, ChatRequestBody, PlatformStats,
};
use crate::relay::{build_prompt, RelayOutcome, StreamRelay};
use crate::upstream::completion_client;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderName, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, info_span, warn, Instrument};

use super::AppState;

/// Version reported by the informational endpoints.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Events buffered between the relay task and the response body.
const EVENT_BUFFER: usize = 32;

/// Routes listed by the banner and the 404 handler.
pub const AVAILABLE_ENDPOINTS: &[&str] = &[
    "GET /",
    "GET /api/health",
    "POST /api/chat",
    "POST /api/analyze",
    "GET /api/token/:address",
    "GET /api/stats",
];

/// `GET /`
pub async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "BlockStat Pro API",
        "version": VERSION,
        "endpoints": {
            "health": "/api/health",
            "chat": "/api/chat (POST)",
            "analyze": "/api/analyze (POST)",
            "token": "/api/token/:address (GET)",
            "stats": "/api/stats (GET)",
        },
        "graph_agent_url": state.analysis.base_url(),
    }))
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let graph_agent = state.analysis.health().await;
    let chatbot = if state.completion.is_configured() {
        "configured"
    } else {
        "not_configured"
    };

    Json(json!({
        "status": "ok",
        "message": "BlockStat API is running",
        "timestamp": Utc::now(),
        "services": {
            "backend": "online",
            "graph_agent": graph_agent.as_str(),
            "chatbot": chatbot,
        },
        "version": VERSION,
    }))
}

/// `POST /api/analyze`
///
/// Statistics are updated exactly once, and only after a successful transform.
pub async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequestBody>, JsonRejection>,
) -> Result<Json<AnalysisResult>, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::InvalidInput(e.body_text()))?;
    let request = AnalysisRequest::parse(body.token_address.as_deref())?;

    info!("Analyzing token {}", request.token_address);

    let payload = state.analysis.analyze(&request.token_address).await?;
    let result = transform(&payload).inspect_err(|e| {
        warn!("Discarding analysis of {}: {}", request.token_address, e);
    })?;

    let stats = state.stats.update(&result);
    info!(
        "Analysis complete for {}: overall risk {}, {} tokens analyzed",
        request.token_address, result.risk_score.overall, stats.total_tokens
    );

    Ok(Json(result))
}

/// `POST /api/chat`
///
/// Failures up to the moment the provider accepts the request are answered
/// with a JSON error; after that the response is an event stream and
/// failures arrive in-band.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequestBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    if !state.completion.is_configured() {
        return Err(GatewayError::NotConfigured(completion_client::SERVICE_NAME));
    }

    let Json(body) = body.map_err(|e| GatewayError::InvalidInput(e.body_text()))?;
    let message = body
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidInput("Message is required".to_string()))?;

    let prompt = build_prompt(body.conversation_history, &message);
    let upstream = state.completion.open_stream(&prompt).await?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let span = info_span!("chat_stream", model = state.completion.model(), turns = prompt.len());
    let idle_timeout = state.idle_timeout;

    tokio::spawn(
        async move {
            let mut relay = StreamRelay::new(idle_timeout);
            let outcome = relay.run(upstream, tx).await;
            if let RelayOutcome::Failed { message } = &outcome {
                warn!("Chat stream ended with an error: {}", message);
            }
            debug!("Relay finished in state {:?}: {:?}", relay.state(), outcome);
        }
        .instrument(span),
    );

    let events = ReceiverStream::new(rx).map(|event| {
        if event.is_terminal() {
            debug!("Writing final chat event");
        }
        Ok::<_, Infallible>(Event::default().data(event.to_data()))
    });

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];

    Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
}

/// `GET /api/token/:address`
pub async fn token_info(Path(address): Path<String>) -> Json<Value> {
    Json(json!({
        "address": address,
        "message": "Token info endpoint",
        "note": "Full token metadata can be retrieved from the analysis endpoint",
    }))
}

/// Body of `GET /api/stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: PlatformStats,
    pub graph_agent_status: &'static str,
    pub services: Value,
}

/// `GET /api/stats`
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let graph_agent_online = state.analysis.health().await.is_healthy();
    if !graph_agent_online {
        info!("Graph agent health check failed");
    }

    let online = |up: bool| if up { "online" } else { "offline" };

    Json(StatsResponse {
        stats: state.stats.snapshot(),
        graph_agent_status: if graph_agent_online {
            "connected"
        } else {
            "disconnected"
        },
        services: json!({
            "backend": "online",
            "graph_agent": online(graph_agent_online),
            "chatbot": online(state.completion.is_configured()),
        }),
    })
}

/// Fallback for unknown routes.
pub async fn not_found(uri: Uri) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Endpoint not found",
            "path": uri.path(),
            "available_endpoints": AVAILABLE_ENDPOINTS,
        })),
    )
}
