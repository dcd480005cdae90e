//! Analysis modules.
//!
//! Reshaping of analysis-provider payloads and the platform statistics they
//! feed.

pub mod aggregator;
pub mod transformer;

pub use aggregator::StatsAggregator;
pub use transformer::transform;
