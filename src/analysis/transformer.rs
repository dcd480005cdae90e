//! Reshape analysis-provider payloads into the client-facing schema.
//!
//! The provider's payload is loosely shaped: the same concept may arrive
//! under more than one field name. Each output field is produced by a fixed,
//! ordered alias list where the first non-null value wins. Everything except
//! `risk_score` is optional and degrades to an empty default.

use crate::error::GatewayError;
use crate::models::{AnalysisResult, Cluster, GraphData, Mixer, RiskScore, Whale};
use serde_json::{Map, Value};

/// Maximum number of holders reported as whales.
pub const MAX_WHALES: usize = 10;

const ADDRESS_ALIASES: &[&str] = &["address", "wallet"];
const CLUSTER_ID_ALIASES: &[&str] = &["id", "cluster_id"];
const CLUSTER_MEMBER_ALIASES: &[&str] = &["nodes", "members", "wallets"];
const BALANCE_ALIASES: &[&str] = &["balance", "amount"];
const PERCENTAGE_ALIASES: &[&str] = &["percentage", "percent"];

/// Map a provider payload to an [`AnalysisResult`].
///
/// Pure: the same payload always produces the same result.
pub fn transform(payload: &Value) -> Result<AnalysisResult, GatewayError> {
    let raw_score = payload
        .get("risk_score")
        .ok_or_else(|| GatewayError::MalformedUpstreamPayload("missing risk_score".into()))?
        .as_f64()
        .ok_or_else(|| {
            GatewayError::MalformedUpstreamPayload("risk_score is not a number".into())
        })?;

    let graph_data = payload.get("graph_data");
    let nodes = array(graph_data, "nodes").to_vec();
    let links = array(graph_data, "links").to_vec();
    let metrics = payload
        .get("metrics")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let active_wallets = nodes
        .iter()
        .filter(|node| node.get("tx_count").and_then(Value::as_f64).unwrap_or(0.0) > 0.0)
        .count();

    let risk_score = RiskScore {
        overall: scale_risk_score(raw_score),
        gini: metric(&metrics, "gini"),
        concentration: metric(&metrics, "top_10_percent_holdings"),
        clustering: metric(&metrics, "clustering_coefficient"),
        total_wallets: nodes.len(),
        active_wallets,
    };

    let mixers = array(Some(payload), "mixer_flags")
        .iter()
        .map(|flag| Mixer {
            address: string(flag, ADDRESS_ALIASES),
            kind: "mixer".to_string(),
            risk_level: "critical".to_string(),
        })
        .collect();

    let clusters = array(Some(payload), "suspicious_clusters")
        .iter()
        .map(|cluster| Cluster {
            id: coalesce(cluster, CLUSTER_ID_ALIASES)
                .cloned()
                .unwrap_or(Value::Null),
            nodes: coalesce(cluster, CLUSTER_MEMBER_ALIASES)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            suspicious: true,
            wash_trading: cluster
                .get("wash_trading")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
        .collect();

    // Upstream order is kept as-is; no re-sorting by balance.
    let whales = array(Some(payload), "top_holders")
        .iter()
        .take(MAX_WHALES)
        .map(|holder| Whale {
            address: string(holder, ADDRESS_ALIASES),
            balance: number(holder, BALANCE_ALIASES),
            percentage: number(holder, PERCENTAGE_ALIASES),
            kind: "whale".to_string(),
            pagerank: number(holder, &["pagerank"]),
        })
        .collect();

    Ok(AnalysisResult {
        graph: GraphData { nodes, links },
        risk_score,
        mixers,
        clusters,
        whales,
        wash_trade_pairs: array(Some(payload), "wash_trade_pairs").to_vec(),
        metrics,
    })
}

/// Scale a raw `[0, 1]` score to an integer percentage.
///
/// Rounds half to even (`0.5 -> 0`, `2.5 -> 2`, `1.5 -> 2`); out-of-range
/// input is clamped.
pub fn scale_risk_score(raw: f64) -> u8 {
    let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };
    (clamped * 100.0).round_ties_even() as u8
}

/// First non-null value among `aliases`, in declared order.
fn coalesce<'a>(record: &'a Value, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| record.get(*key))
        .find(|value| !value.is_null())
}

fn string(record: &Value, aliases: &[&str]) -> Option<String> {
    coalesce(record, aliases)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn number(record: &Value, aliases: &[&str]) -> f64 {
    coalesce(record, aliases)
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

fn metric(metrics: &Map<String, Value>, key: &str) -> f64 {
    metrics.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn array<'a>(parent: Option<&'a Value>, key: &str) -> &'a [Value] {
    parent
        .and_then(|p| p.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
