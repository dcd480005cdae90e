//! HTTP client for the analysis provider (graph agent).

use crate::config::AnalysisConfig;
use crate::error::GatewayError;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name used in errors and logs.
pub const SERVICE_NAME: &str = "Graph Agent service";

/// Reported when the provider rejects a request without saying why.
const FAILURE_MESSAGE: &str = "Analysis failed";

/// Settings for [`AnalysisClient`].
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub base_url: String,
    pub chain: String,
    pub api_provider: String,
    /// Budget passed to the provider.
    pub provider_timeout: Duration,
    /// Gateway-side timeout; strictly greater than `provider_timeout`.
    pub timeout: Duration,
    pub health_timeout: Duration,
}

impl From<&AnalysisConfig> for AnalysisSettings {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            chain: config.chain.clone(),
            api_provider: config.api_provider.clone(),
            provider_timeout: Duration::from_secs(config.provider_timeout_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
            health_timeout: Duration::from_secs(config.health_timeout_seconds),
        }
    }
}

/// Outcome of a provider health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderHealth {
    Healthy,
    Unhealthy,
    Unavailable,
}

impl ProviderHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderHealth::Healthy => "healthy",
            ProviderHealth::Unhealthy => "unhealthy",
            ProviderHealth::Unavailable => "unavailable",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, ProviderHealth::Healthy)
    }
}

impl fmt::Display for ProviderHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body of the provider's `/analyze` endpoint.
#[derive(Debug, Serialize)]
struct AnalyzeUpstreamRequest<'a> {
    token_address: &'a str,
    chain: &'a str,
    api_provider: &'a str,
    timeout_seconds: u64,
}

/// Client for the analysis provider.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    settings: AnalysisSettings,
    http_client: reqwest::Client,
}

impl AnalysisClient {
    /// Create a client. Per-call timeouts are applied per request.
    pub fn new(settings: AnalysisSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client for the analysis provider")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// Base URL of the provider.
    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    /// Run an analysis and return the provider's raw payload.
    pub async fn analyze(&self, token_address: &str) -> Result<Value, GatewayError> {
        let url = format!("{}/analyze", self.settings.base_url);
        let timeout_secs = self.settings.timeout.as_secs();

        let request = AnalyzeUpstreamRequest {
            token_address,
            chain: &self.settings.chain,
            api_provider: &self.settings.api_provider,
            timeout_seconds: self.settings.provider_timeout.as_secs(),
        };

        debug!("POST {} for {}", url, token_address);

        let response = self
            .http_client
            .post(&url)
            .timeout(self.settings.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Analysis request failed: {}", e);
                GatewayError::from_reqwest(SERVICE_NAME, &self.settings.base_url, timeout_secs, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Analysis provider returned {}: {}", status, body);
            return Err(GatewayError::rejected(
                SERVICE_NAME,
                status.as_u16(),
                &body,
                FAILURE_MESSAGE,
            ));
        }

        // A body cut short is a transport failure; only a complete body that
        // fails to parse is a malformed payload.
        let body = response.bytes().await.map_err(|e| {
            error!("Reading analysis response failed: {}", e);
            if e.is_timeout() {
                GatewayError::UpstreamTimeout {
                    service: SERVICE_NAME,
                    seconds: timeout_secs,
                }
            } else {
                GatewayError::Io(e.to_string())
            }
        })?;

        let payload = serde_json::from_slice::<Value>(&body).map_err(|e| {
            GatewayError::MalformedUpstreamPayload(format!("response is not JSON: {}", e))
        })?;

        info!("Analysis provider answered for {}", token_address);
        Ok(payload)
    }

    /// Probe the provider's `/health` endpoint. Never fails.
    pub async fn health(&self) -> ProviderHealth {
        let url = format!("{}/health", self.settings.base_url);

        let response = match self
            .http_client
            .get(&url)
            .timeout(self.settings.health_timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Health probe failed: {}", e);
                return ProviderHealth::Unavailable;
            }
        };

        match response.json::<Value>().await {
            Ok(body) if body.get("status").and_then(Value::as_str) == Some("healthy") => {
                ProviderHealth::Healthy
            }
            Ok(_) => ProviderHealth::Unhealthy,
            Err(e) => {
                debug!("Health probe returned an unreadable body: {}", e);
                ProviderHealth::Unhealthy
            }
        }
    }
}
