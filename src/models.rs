//! Data models for the gateway.
//!
//! This module contains the request bodies accepted from callers, the
//! client-facing analysis schema, the chat turn types and the platform-wide
//! statistics record.

use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Body of `POST /api/analyze`.
///
/// Fields are optional so a missing address is reported as our own 400
/// instead of a body-decoding rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequestBody {
    #[serde(default)]
    pub token_address: Option<String>,
}

/// A validated analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub token_address: String,
}

impl AnalysisRequest {
    /// Validate a caller-supplied token address (`0x` followed by 40 hex digits).
    pub fn parse(token_address: Option<&str>) -> Result<Self, GatewayError> {
        let address = token_address.map(str::trim).unwrap_or_default();

        if address.is_empty() {
            return Err(GatewayError::InvalidInput(
                "token_address is required".to_string(),
            ));
        }

        if !is_token_address(address) {
            return Err(GatewayError::InvalidInput(format!(
                "token_address must be 0x followed by 40 hex characters, got '{}'",
                address
            )));
        }

        Ok(Self {
            token_address: address.to_string(),
        })
    }
}

/// Returns true for `0x` + 40 hex digits.
pub fn is_token_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(hex) => hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Graph section of an analysis result, passed through from upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<Value>,
    pub links: Vec<Value>,
}

/// Risk figures derived from the upstream payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    /// Integer percentage in `[0, 100]`.
    pub overall: u8,
    pub gini: f64,
    pub concentration: f64,
    pub clustering: f64,
    pub total_wallets: usize,
    pub active_wallets: usize,
}

/// A wallet flagged against the known-mixer list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mixer {
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub risk_level: String,
}

/// A suspicious wallet community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Value,
    pub nodes: Vec<Value>,
    pub suspicious: bool,
    pub wash_trading: bool,
}

/// One of the top token holders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Whale {
    pub address: Option<String>,
    pub balance: f64,
    pub percentage: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub pagerank: f64,
}

/// Client-facing analysis schema produced by the transformer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub graph: GraphData,
    pub risk_score: RiskScore,
    pub mixers: Vec<Mixer>,
    pub clusters: Vec<Cluster>,
    pub whales: Vec<Whale>,
    pub wash_trade_pairs: Vec<Value>,
    pub metrics: Map<String, Value>,
}

impl AnalysisResult {
    /// `metrics.total_transactions`, or 0 when absent or not a non-negative integer.
    pub fn total_transactions(&self) -> u64 {
        self.metrics
            .get("total_transactions")
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequestBody {
    #[serde(default)]
    pub message: Option<String>,
    /// Caller-managed window of prior turns, already trimmed by the caller.
    #[serde(default, rename = "conversationHistory")]
    pub conversation_history: Vec<ChatTurn>,
}

/// The fixed sentinel that ends a relayed stream.
pub const TERMINAL_MARKER: &str = "[DONE]";

/// One event forwarded to a chat caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental token fragment; never empty.
    Content(String),
    /// End of stream.
    Done,
    /// In-band failure after the stream has started.
    Error(String),
}

impl StreamEvent {
    /// The `data:` payload written on the wire for this event.
    pub fn to_data(&self) -> String {
        match self {
            StreamEvent::Content(content) => json!({ "content": content }).to_string(),
            StreamEvent::Done => TERMINAL_MARKER.to_string(),
            StreamEvent::Error(message) => json!({ "error": message }).to_string(),
        }
    }

    /// Returns true for the two events that end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }
}

/// Process-wide running statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub total_tokens: u64,
    pub total_wallets: u64,
    pub total_transactions: u64,
    pub high_risk_tokens: u64,
    pub mixer_detections: u64,
    pub wash_trading_cases: u64,
    pub avg_risk_score: f64,
    pub active_analyses: u64,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

    #[test]
    fn test_token_address_validation() {
        assert!(is_token_address(VALID));
        assert!(is_token_address(&VALID.to_lowercase()));
        assert!(!is_token_address("dAC17F958D2ee523a2206206994597C13D831ec7"));
        assert!(!is_token_address("0x1234"));
        assert!(!is_token_address("0xZZC17F958D2ee523a2206206994597C13D831ec7"));
        assert!(!is_token_address(&format!("{}00", VALID)));
    }

    #[test]
    fn test_analysis_request_parse() {
        let request = AnalysisRequest::parse(Some(&format!("  {}  ", VALID))).unwrap();
        assert_eq!(request.token_address, VALID);

        for bad in [None, Some(""), Some("   "), Some("not-an-address")] {
            let err = AnalysisRequest::parse(bad).unwrap_err();
            assert_eq!(err.code(), "invalid_input");
        }
    }

    #[test]
    fn test_stream_event_data() {
        assert_eq!(
            StreamEvent::Content("he said \"hi\"".into()).to_data(),
            r#"{"content":"he said \"hi\""}"#
        );
        assert_eq!(StreamEvent::Done.to_data(), "[DONE]");
        assert_eq!(
            StreamEvent::Error("An error occurred".into()).to_data(),
            r#"{"error":"An error occurred"}"#
        );
        assert!(StreamEvent::Done.is_terminal());
        assert!(!StreamEvent::Content("x".into()).is_terminal());
    }

    #[test]
    fn test_chat_request_body_parsing() {
        let body: ChatRequestBody = serde_json::from_str(
            r#"{"message":"and +7 = ?","conversationHistory":[
                {"role":"user","content":"5+5"},
                {"role":"assistant","content":"10"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.message.as_deref(), Some("and +7 = ?"));
        assert_eq!(body.conversation_history.len(), 2);
        assert_eq!(body.conversation_history[1].role, ChatRole::Assistant);

        let empty: ChatRequestBody = serde_json::from_str("{}").unwrap();
        assert!(empty.message.is_none());
        assert!(empty.conversation_history.is_empty());
    }

    #[test]
    fn test_unknown_role_rejected() {
        let parsed = serde_json::from_str::<ChatTurn>(r#"{"role":"tool","content":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_result_total_transactions() {
        let mut result = AnalysisResult::default();
        assert_eq!(result.total_transactions(), 0);
        result
            .metrics
            .insert("total_transactions".into(), json!(120));
        assert_eq!(result.total_transactions(), 120);
        result
            .metrics
            .insert("total_transactions".into(), json!("many"));
        assert_eq!(result.total_transactions(), 0);
    }

    #[test]
    fn test_output_type_fields_serialize_as_type() {
        let whale = Whale {
            address: Some("0xA".into()),
            balance: 1.0,
            percentage: 2.0,
            kind: "whale".into(),
            pagerank: 0.0,
        };
        let value = serde_json::to_value(&whale).unwrap();
        assert_eq!(value["type"], "whale");
        assert!(value.get("kind").is_none());
    }
}
