pub mod projection;

use thiserror::Error;

pub use projection::{PortfolioAnalytics, PortfolioProjection, PositionSnapshot};

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("fill for unknown position bookkeeping on symbol {0}")]
    UnknownSymbol(String),
}

/// §3 `PortfolioSnapshot`, published at most every `persistThrottleMs` (§4.11).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PortfolioSnapshot {
    pub t: chrono::DateTime<chrono::Utc>,
    pub positions: Vec<PositionSnapshot>,
    pub cash: f64,
    pub nav: f64,
    pub realized: f64,
    pub unrealized: f64,
}
