//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.blockstat.toml` files and the command line.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".blockstat.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Analysis provider settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Completion provider settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Seed values for the platform statistics.
    #[serde(default)]
    pub stats: StatsSeedConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Analysis provider (graph agent) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Base URL of the analysis provider.
    #[serde(default = "default_analysis_url")]
    pub url: String,

    /// Chain passed through to the provider.
    #[serde(default = "default_chain")]
    pub chain: String,

    /// Data source the provider should use.
    #[serde(default = "default_api_provider")]
    pub api_provider: String,

    /// Processing budget requested from the provider, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,

    /// Gateway-side timeout for one analysis call. Must exceed the provider budget.
    #[serde(default = "default_analysis_timeout")]
    pub timeout_seconds: u64,

    /// Timeout for the provider health probe.
    #[serde(default = "default_health_timeout")]
    pub health_timeout_seconds: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            url: default_analysis_url(),
            chain: default_chain(),
            api_provider: default_api_provider(),
            provider_timeout_seconds: default_provider_timeout(),
            timeout_seconds: default_analysis_timeout(),
            health_timeout_seconds: default_health_timeout(),
        }
    }
}

fn default_analysis_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_chain() -> String {
    "ethereum".to_string()
}

fn default_api_provider() -> String {
    "auto".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_analysis_timeout() -> u64 {
    35 // provider budget + 5s margin
}

fn default_health_timeout() -> u64 {
    5
}

/// Completion provider (LLM) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_completion_url")]
    pub api_url: String,

    /// Bearer credential. Usually supplied through `GROQ_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff.
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum tokens in one completion.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,

    /// Reasoning effort hint for reasoning models.
    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: Option<String>,

    /// Fail a stream when no chunk arrives for this long. Unset means no limit.
    #[serde(default)]
    pub idle_timeout_seconds: Option<u64>,

    /// Timeout for establishing the upstream connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Time allowed for the provider to accept a request and start streaming.
    #[serde(default = "default_open_timeout")]
    pub open_timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: default_completion_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_completion_tokens: default_max_completion_tokens(),
            reasoning_effort: default_reasoning_effort(),
            idle_timeout_seconds: None,
            connect_timeout_seconds: default_connect_timeout(),
            open_timeout_seconds: default_open_timeout(),
        }
    }
}

fn default_completion_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "openai/gpt-oss-120b".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

fn default_max_completion_tokens() -> u32 {
    8192
}

fn default_reasoning_effort() -> Option<String> {
    Some("medium".to_string())
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_open_timeout() -> u64 {
    30
}

/// Starting values for the platform statistics (historical backfill).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSeedConfig {
    #[serde(default = "default_seed_tokens")]
    pub total_tokens: u64,
    #[serde(default = "default_seed_wallets")]
    pub total_wallets: u64,
    #[serde(default = "default_seed_transactions")]
    pub total_transactions: u64,
    #[serde(default = "default_seed_high_risk")]
    pub high_risk_tokens: u64,
    #[serde(default = "default_seed_mixers")]
    pub mixer_detections: u64,
    #[serde(default = "default_seed_wash_trading")]
    pub wash_trading_cases: u64,
    #[serde(default = "default_seed_avg_risk")]
    pub avg_risk_score: f64,
    #[serde(default)]
    pub active_analyses: u64,
}

impl Default for StatsSeedConfig {
    fn default() -> Self {
        Self {
            total_tokens: default_seed_tokens(),
            total_wallets: default_seed_wallets(),
            total_transactions: default_seed_transactions(),
            high_risk_tokens: default_seed_high_risk(),
            mixer_detections: default_seed_mixers(),
            wash_trading_cases: default_seed_wash_trading(),
            avg_risk_score: default_seed_avg_risk(),
            active_analyses: 0,
        }
    }
}

fn default_seed_tokens() -> u64 {
    1247
}

fn default_seed_wallets() -> u64 {
    856_432
}

fn default_seed_transactions() -> u64 {
    12_456_789
}

fn default_seed_high_risk() -> u64 {
    189
}

fn default_seed_mixers() -> u64 {
    67
}

fn default_seed_wash_trading() -> u64 {
    134
}

fn default_seed_avg_risk() -> f64 {
    42.3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        Self::load_from_dir(Path::new("."))
    }

    /// Try to load `.blockstat.toml` from a directory.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            Ok(Some(Self::load(&config_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments (and their environment fallbacks) take precedence over
    /// config file settings, but only when they were actually provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref host) = args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref url) = args.graph_agent_url {
            self.analysis.url = url.clone();
        }

        if let Some(ref key) = args.groq_api_key {
            if !key.trim().is_empty() {
                self.completion.api_key = Some(key.trim().to_string());
            }
        }
        if let Some(ref model) = args.model {
            self.completion.model = model.clone();
        }
    }

    /// Check cross-field constraints.
    ///
    /// Returns non-fatal warnings; fails on settings the gateway cannot run with.
    pub fn validate(&self) -> Result<Vec<String>> {
        if self.analysis.timeout_seconds <= self.analysis.provider_timeout_seconds {
            bail!(
                "analysis.timeout_seconds ({}) must be greater than \
                 analysis.provider_timeout_seconds ({})",
                self.analysis.timeout_seconds,
                self.analysis.provider_timeout_seconds
            );
        }

        if self.analysis.provider_timeout_seconds == 0 {
            bail!("analysis.provider_timeout_seconds must be at least 1");
        }

        if self.completion.open_timeout_seconds == 0 {
            bail!("completion.open_timeout_seconds must be at least 1");
        }

        if self.completion.idle_timeout_seconds == Some(0) {
            bail!("completion.idle_timeout_seconds must be at least 1 when set");
        }

        let mut warnings = Vec::new();

        if !self.completion_configured() {
            warnings.push(
                "GROQ_API_KEY not found - chat requests will answer 'not configured'".to_string(),
            );
        }

        Ok(warnings)
    }

    /// Whether the completion provider has a credential.
    pub fn completion_configured(&self) -> bool {
        self.completion
            .api_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
