//! Gateway error taxonomy.
//!
//! Every failure the request handlers can hit is one of these kinds. They are
//! all turned into a structured `{ "error", "code" }` JSON body at the HTTP
//! boundary, so none of them ever takes the process down.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the relay, the transformer and the upstream clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or malformed caller input. Never retried.
    #[error("{0}")]
    InvalidInput(String),

    /// The upstream refused the connection or could not be reached.
    #[error("{service} is not available at {url}")]
    UpstreamUnavailable { service: &'static str, url: String },

    /// The gateway-side timeout expired before the upstream answered.
    #[error("{service} did not answer within {seconds}s")]
    UpstreamTimeout { service: &'static str, seconds: u64 },

    /// The upstream answered with an explicit error.
    #[error("{service} rejected the request ({status}): {message}")]
    UpstreamRejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    /// A required credential is absent; detected before any network call.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The analysis payload lacks a numeric `risk_score`.
    #[error("malformed upstream payload: {0}")]
    MalformedUpstreamPayload(String),

    /// Generic transport failure that fits none of the kinds above.
    #[error("upstream I/O failure: {0}")]
    Io(String),
}

impl GatewayError {
    /// Classify a `reqwest` failure against a named upstream.
    ///
    /// Timeouts are checked first: a connect attempt that runs out the clock is
    /// a timeout, not an outage.
    pub fn from_reqwest(
        service: &'static str,
        url: &str,
        seconds: u64,
        err: reqwest::Error,
    ) -> Self {
        if err.is_timeout() {
            GatewayError::UpstreamTimeout { service, seconds }
        } else if err.is_connect() {
            GatewayError::UpstreamUnavailable {
                service,
                url: url.to_string(),
            }
        } else {
            GatewayError::Io(err.to_string())
        }
    }

    /// Build an `UpstreamRejected` from a status and a raw response body.
    ///
    /// `fallback` is reported when the body carries no message at all.
    pub fn rejected(service: &'static str, status: u16, body: &str, fallback: &str) -> Self {
        GatewayError::UpstreamRejected {
            service,
            status,
            message: extract_upstream_message(body, fallback),
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamRejected { .. } => "upstream_rejected",
            GatewayError::NotConfigured(_) => "not_configured",
            GatewayError::MalformedUpstreamPayload(_) => "malformed_upstream_payload",
            GatewayError::Io(_) => "upstream_io",
        }
    }

    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamRejected { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            GatewayError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::MalformedUpstreamPayload(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the caller. Provider rejections pass the provider's
    /// own message through; the rest use the error's display text.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::UpstreamRejected { message, .. } => message.clone(),
            GatewayError::UpstreamTimeout { service, .. } => {
                format!("{} timed out. The request took too long.", service)
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.public_message(),
            "code": self.code(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

/// Pull a human-readable message out of an upstream error body.
///
/// Prefers a JSON `detail` field, then `error` (string or `{ message }`), then
/// the raw text, then `fallback`.
pub fn extract_upstream_message(body: &str, fallback: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["detail", "error"] {
            match value.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return s.clone(),
                Some(Value::Object(obj)) => {
                    if let Some(Value::String(s)) = obj.get("message") {
                        return s.clone();
                    }
                }
                _ => {}
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
