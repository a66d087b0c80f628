pub mod pipeline;
pub mod reservation;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use pipeline::{ApprovedIntent, RejectedIntent, RiskPipeline};

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("unknown symbol {0} has no configured price band or instrument metadata")]
    UnknownSymbol(String),
}

/// §3 `PriceBand[symbol]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceBand {
    pub min: f64,
    pub max: f64,
}

/// §3 `Throttle`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Throttle {
    pub window_ms: i64,
    pub max_count: u32,
}

/// Margin/leverage guard parameters (§4.6 step 6).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarginConfig {
    pub collateral: f64,
    pub leverage_cap: f64,
}

/// §3 `RiskConfig`. Per-strategy budgets override the base via
/// [`RiskPipeline::with_strategy_override`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RiskConfig {
    pub notional: f64,
    pub max_position: f64,
    pub price_bands: std::collections::HashMap<String, PriceBand>,
    pub throttle: Throttle,
    pub margin: Option<MarginConfig>,
}

/// Tapped onto the bus for every risk evaluation (§4.6 `risk.check`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckOutcome {
    pub order_id: Uuid,
    pub passed: bool,
    pub reasons: Vec<String>,
}
