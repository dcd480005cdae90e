//! Platform-wide statistics aggregation.
//!
//! One [`StatsAggregator`] is built at startup from the configured seed and
//! shared by reference with the request handlers. Every update runs under a
//! single lock, so concurrent analyses never interleave the
//! increment-and-divide steps of the running mean.

use crate::config::StatsSeedConfig;
use crate::models::{AnalysisResult, PlatformStats};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

/// Overall scores strictly above this count as high risk.
pub const HIGH_RISK_THRESHOLD: u8 = 70;

/// Shared running-statistics store.
#[derive(Debug)]
pub struct StatsAggregator {
    stats: Mutex<PlatformStats>,
}

impl StatsAggregator {
    /// Create an aggregator starting from `seed`.
    pub fn new(seed: PlatformStats) -> Self {
        Self {
            stats: Mutex::new(seed),
        }
    }

    /// Fold one completed analysis into the statistics.
    ///
    /// Not idempotent: the caller must invoke this exactly once per analysis.
    /// Returns the statistics as they stand after the update.
    pub fn update(&self, result: &AnalysisResult) -> PlatformStats {
        let mut stats = self.stats.lock();
        apply(&mut stats, result);
        debug!(
            "Stats updated: {} tokens, avg risk {:.2}",
            stats.total_tokens, stats.avg_risk_score
        );
        stats.clone()
    }

    /// Copy of the current statistics.
    pub fn snapshot(&self) -> PlatformStats {
        self.stats.lock().clone()
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(PlatformStats::from(&StatsSeedConfig::default()))
    }
}

impl From<&StatsSeedConfig> for PlatformStats {
    fn from(seed: &StatsSeedConfig) -> Self {
        Self {
            total_tokens: seed.total_tokens,
            total_wallets: seed.total_wallets,
            total_transactions: seed.total_transactions,
            high_risk_tokens: seed.high_risk_tokens,
            mixer_detections: seed.mixer_detections,
            wash_trading_cases: seed.wash_trading_cases,
            avg_risk_score: seed.avg_risk_score,
            active_analyses: seed.active_analyses,
            last_updated: Utc::now(),
        }
    }
}

/// The update recurrence, applied to an already-locked record.
///
/// The running mean weights the previous average by the token count before
/// this update. With a seeded `total_tokens`, the seeded average therefore
/// counts as `total_tokens` prior observations.
fn apply(stats: &mut PlatformStats, result: &AnalysisResult) {
    let overall = result.risk_score.overall;
    let tokens_before = stats.total_tokens;

    stats.total_tokens += 1;
    stats.total_wallets += result.graph.nodes.len() as u64;
    stats.total_transactions += result.total_transactions();

    if overall > HIGH_RISK_THRESHOLD {
        stats.high_risk_tokens += 1;
    }

    stats.mixer_detections += result.mixers.len() as u64;
    stats.wash_trading_cases += result.wash_trade_pairs.len() as u64;

    stats.avg_risk_score = (stats.avg_risk_score * tokens_before as f64 + f64::from(overall))
        / stats.total_tokens as f64;

    stats.last_updated = Utc::now();
}
