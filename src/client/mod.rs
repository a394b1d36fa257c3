//! Odds provider clients

pub mod odds_api;
pub mod rate_limit;

pub use odds_api::OddsApiClient;
pub use rate_limit::{BackoffPolicy, RateLimiter};

use crate::error::ClientError;
use async_trait::async_trait;
use serde_json::Value;

/// Source of raw odds payloads
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// Fetch the current odds for the given sports, one JSON value per page
    async fn fetch_snapshot(&self, sports: &[String]) -> Result<Vec<Value>, ClientError>;
}
