//! Clients for the two upstream providers.

pub mod analysis_client;
pub mod completion_client;

pub use analysis_client::{AnalysisClient, AnalysisSettings};
pub use completion_client::{CompletionClient, CompletionSettings};
