//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Every setting is optional here so that values from
//! `.blockstat.toml` are only overridden when explicitly given.

use clap::Parser;
use std::path::PathBuf;

/// BlockStat gateway - token analysis and chat relay backend
///
/// Forwards token analyses to the graph agent, reshapes the results and keeps
/// platform statistics; relays chat turns to the completion provider as a
/// server-sent event stream.
///
/// Examples:
///   blockstat-gateway
///   blockstat-gateway --port 8080 --graph-agent-url http://graph-agent:8000
///   GROQ_API_KEY=gsk_... blockstat-gateway --verbose
///   blockstat-gateway --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Interface to bind (default: 0.0.0.0)
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Port to listen on (default: 5000)
    #[arg(short, long, value_name = "PORT", env = "PORT")]
    pub port: Option<u16>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .blockstat.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base URL of the graph agent (analysis provider)
    #[arg(long, value_name = "URL", env = "GRAPH_AGENT_URL")]
    pub graph_agent_url: Option<String>,

    /// API key for the completion provider
    #[arg(long, value_name = "KEY", env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    /// Completion model identifier
    #[arg(short, long, value_name = "MODEL", env = "BLOCKSTAT_MODEL")]
    pub model: Option<String>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .blockstat.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.graph_agent_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Graph agent URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.port == Some(0) {
            return Err("Port must be between 1 and 65535".to_string());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref config_path) = self.config {
            if !config_path.is_file() {
                return Err(format!(
                    "Config file does not exist: {}",
                    config_path.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
