//! Streaming client for the completion provider.
//!
//! Speaks the OpenAI-compatible chat completions protocol with
//! `stream: true`: the response body is a server-sent event stream of
//! `data: <chunk json>` lines ended by `data: [DONE]`.

use crate::config::CompletionConfig;
use crate::error::GatewayError;
use crate::models::{ChatTurn, TERMINAL_MARKER};
use anyhow::{Context, Result};
use futures::{future, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};

/// Name used in errors and logs.
pub const SERVICE_NAME: &str = "Chatbot service";

/// Reported when the provider rejects a request without saying why.
const FAILURE_MESSAGE: &str = "Failed to process chat request";

/// Longest single SSE line accepted from the provider.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Ordered text increments from the provider. Increments may be empty.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// Settings for [`CompletionClient`].
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_completion_tokens: u32,
    pub reasoning_effort: Option<String>,
    pub connect_timeout: Duration,
    /// Bound on sending the request and receiving the response head.
    pub open_timeout: Duration,
}

impl From<&CompletionConfig> for CompletionSettings {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
            model: config.model.clone(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_completion_tokens: config.max_completion_tokens,
            reasoning_effort: config.reasoning_effort.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
            open_timeout: Duration::from_secs(config.open_timeout_seconds),
        }
    }
}

/// Chat completions request body.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    temperature: f32,
    top_p: f32,
    max_completion_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

/// One streamed chunk. Unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// A classified line of the provider's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// Text increment (possibly empty).
    Delta(String),
    /// The provider's end-of-stream sentinel.
    Done,
    /// Blank line, comment, or a field the relay does not use.
    Skip,
}

/// Classify one line of the provider's event stream.
pub fn parse_sse_line(line: &str) -> Result<SseLine, GatewayError> {
    let line = line.trim_end_matches('\r');

    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, `:` comments, `event:`/`id:`/`retry:` fields
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();

    if data == TERMINAL_MARKER {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: CompletionChunk = serde_json::from_str(data).map_err(|e| {
        GatewayError::MalformedUpstreamPayload(format!("unreadable stream chunk: {}", e))
    })?;

    if chunk.error.is_some() {
        return Err(GatewayError::rejected(SERVICE_NAME, 502, data, FAILURE_MESSAGE));
    }

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    Ok(SseLine::Delta(content))
}

/// Client for the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    settings: CompletionSettings,
    http_client: reqwest::Client,
}

impl CompletionClient {
    /// Create a client. No overall request timeout is set since streams are
    /// long-lived; the open phase is bounded per call.
    pub fn new(settings: CompletionSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .context("Failed to create HTTP client for the completion provider")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// Whether a credential is available.
    pub fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }

    /// Model requests are sent to.
    pub fn model(&self) -> &str {
        &self.settings.model
    }

    /// Open a completion stream for `messages`.
    ///
    /// Resolves once the provider has accepted the request; failures up to
    /// that point are returned here, later ones arrive as stream items. A
    /// provider that does not answer within the open timeout is an
    /// `UpstreamTimeout`.
    pub async fn open_stream(&self, messages: &[ChatTurn]) -> Result<TokenStream, GatewayError> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            error!("Completion provider credential is missing");
            return Err(GatewayError::NotConfigured(SERVICE_NAME));
        };

        let url = format!("{}/chat/completions", self.settings.api_url);
        let request = CompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            max_completion_tokens: self.settings.max_completion_tokens,
            stream: true,
            reasoning_effort: self.settings.reasoning_effort.as_deref(),
        };

        debug!(
            "Opening completion stream with {} messages on {}",
            messages.len(),
            self.settings.model
        );

        let open_timeout = self.settings.open_timeout;
        let response = tokio::time::timeout(open_timeout, self.send(&url, api_key, &request))
            .await
            .map_err(|_| {
                warn!("Completion provider did not answer within {:?}", open_timeout);
                GatewayError::UpstreamTimeout {
                    service: SERVICE_NAME,
                    seconds: open_timeout.as_secs(),
                }
            })??;

        info!("Completion stream accepted ({})", response.status());

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let lines = FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );

        let tokens = lines
            .map(|line| match line {
                Ok(line) => parse_sse_line(&line),
                Err(e) => Err(GatewayError::Io(e.to_string())),
            })
            .take_while(|item| future::ready(!matches!(item, Ok(SseLine::Done))))
            .filter_map(|item| {
                future::ready(match item {
                    Ok(SseLine::Delta(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(tokens))
    }

    /// Send the request and check the response head.
    async fn send(
        &self,
        url: &str,
        api_key: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .http_client
            .post(url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Completion request failed: {}", e);
                GatewayError::from_reqwest(
                    SERVICE_NAME,
                    &self.settings.api_url,
                    self.settings.connect_timeout.as_secs(),
                    e,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Completion provider returned {}: {}", status, body);
            return Err(GatewayError::rejected(
                SERVICE_NAME,
                status.as_u16(),
                &body,
                FAILURE_MESSAGE,
            ));
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatRole;
    use crate::test_support::{closed_port_url, spawn_upstream};
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn settings(api_url: String, api_key: Option<&str>) -> CompletionSettings {
        CompletionSettings {
            api_url,
            api_key: api_key.map(str::to_string),
            model: "test-model".into(),
            temperature: 1.0,
            top_p: 1.0,
            max_completion_tokens: 256,
            reasoning_effort: Some("medium".into()),
            connect_timeout: Duration::from_secs(2),
            open_timeout: Duration::from_secs(5),
        }
    }

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": content}}]
            })
        )
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("event: message").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line("data:[DONE]\r").unwrap(), SseLine::Done);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            SseLine::Delta("Hel".into())
        );
        // Role-only and finish chunks carry no text
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Delta(String::new())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap(),
            SseLine::Delta(String::new())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[]}"#).unwrap(),
            SseLine::Delta(String::new())
        );
    }

    #[test]
    fn test_parse_sse_line_errors() {
        let err = parse_sse_line("data: {not json").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedUpstreamPayload(_)));

        let line = r#"data: {"error":{"message":"model overloaded"}}"#;
        let err = parse_sse_line(line).unwrap_err();
        assert_eq!(err.public_message(), "model overloaded");
    }

    #[test]
    fn test_settings_drop_blank_key() {
        let mut config = CompletionConfig::default();
        config.api_key = Some("  ".into());
        assert!(CompletionSettings::from(&config).api_key.is_none());

        config.api_key = Some("gsk_1".into());
        assert_eq!(CompletionSettings::from(&config).api_key.as_deref(), Some("gsk_1"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        // Nothing listens here; a network attempt would be Unavailable instead
        let client = CompletionClient::new(settings(closed_port_url().await, None)).unwrap();
        assert!(!client.is_configured());

        let err = client
            .open_stream(&[ChatTurn::new(ChatRole::User, "hi")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_stream_yields_increments_in_order() {
        let seen = Arc::new(Mutex::new(None::<(Option<String>, Value)>));
        let seen_in_handler = Arc::clone(&seen);

        let app = Router::new().route(
            "/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    let auth = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    *seen.lock().await = Some((auth, body));

                    let body = [
                        ": processing\n\n".to_string(),
                        chunk(""),
                        chunk("Hel"),
                        chunk("lo"),
                        chunk(" world"),
                        "data: [DONE]\n\n".to_string(),
                        chunk("after done"),
                    ]
                    .concat();
                    ([(header::CONTENT_TYPE, "text/event-stream")], body)
                }
            }),
        );
        let base = spawn_upstream(app).await;

        let client = CompletionClient::new(settings(base, Some("gsk_test"))).unwrap();
        let messages = vec![
            ChatTurn::new(ChatRole::System, "be nice"),
            ChatTurn::new(ChatRole::User, "hello"),
        ];
        let stream = client.open_stream(&messages).await.unwrap();
        let items: Vec<String> = stream.map(|item| item.unwrap()).collect().await;

        assert_eq!(items, vec!["", "Hel", "lo", " world"]);

        let (auth, body) = seen.lock().await.clone().unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer gsk_test"));
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["reasoning_effort"], "medium");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hello");
    }

    #[tokio::test]
    async fn test_stream_without_sentinel_ends_at_close() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { [chunk("a"), chunk("b")].concat() }),
        );
        let base = spawn_upstream(app).await;

        let client = CompletionClient::new(settings(base, Some("k"))).unwrap();
        let items: Vec<_> = client
            .open_stream(&[ChatTurn::new(ChatRole::User, "x")])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_rejected_open() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": {"message": "Invalid API Key"}})),
                )
            }),
        );
        let base = spawn_upstream(app).await;

        let client = CompletionClient::new(settings(base, Some("bad"))).unwrap();
        let err = client
            .open_stream(&[ChatTurn::new(ChatRole::User, "x")])
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), "Invalid API Key");
    }

    #[tokio::test]
    async fn test_rejected_open_without_body() {
        let app = Router::new().route(
            "/chat/completions",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_upstream(app).await;

        let client = CompletionClient::new(settings(base, Some("k"))).unwrap();
        let err = client
            .open_stream(&[ChatTurn::new(ChatRole::User, "x")])
            .await
            .err()
            .unwrap();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Failed to process chat request");
    }

    #[tokio::test]
    async fn test_silent_provider_times_out_on_open() {
        // Accepts the connection but holds back the response head
        let app = Router::new().route(
            "/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                chunk("too late")
            }),
        );
        let base = spawn_upstream(app).await;

        let mut settings = settings(base, Some("k"));
        settings.open_timeout = Duration::from_millis(200);
        let client = CompletionClient::new(settings).unwrap();

        let opened = tokio::time::timeout(
            Duration::from_secs(3),
            client.open_stream(&[ChatTurn::new(ChatRole::User, "x")]),
        )
        .await;
        let err = match opened {
            Ok(result) => result.err().unwrap(),
            Err(_) => panic!("open_stream still pending after 3s"),
        };
        assert!(matches!(err, GatewayError::UpstreamTimeout { .. }), "got {:?}", err);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let client = CompletionClient::new(settings(closed_port_url().await, Some("k"))).unwrap();
        let err = client
            .open_stream(&[ChatTurn::new(ChatRole::User, "x")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }), "got {:?}", err);
    }
}
