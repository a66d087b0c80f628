use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::exit::engine::{ExitConfig, RiskActionConfig};
use crate::execution::policy::ReliabilityConfig;
use crate::execution::reconciler::ReconcilerConfig;
use crate::persistence::{OverflowPolicy, PersistenceConfig};
use crate::risk::RiskConfig;
use crate::risk_breach::RiskBreachConfig;
use crate::strategy::intent::{IntentMode, Tif};

/// §6 "Configuration (recognized keys)". Loading this from a file/env layer is out of scope
/// (an external collaborator owns that); these types only describe the shape a loader must
/// produce, mirroring the `RuntimeConfig` tree a `serde`-based loader in the wider pack would
/// deserialize into.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub persistence: PersistenceSection,
    pub gateway: GatewaySection,
    pub execution: ExecutionSection,
    pub risk: RiskConfig,
    pub risk_breach: RiskBreachConfig,
    pub strategies: Vec<StrategyConfig>,
    pub accounting: AccountingSection,
    pub rebalancer: Option<RebalancerSection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceDriver {
    Memory,
    File,
    Sqlite,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceSection {
    pub driver: PersistenceDriver,
    pub sqlite_path: Option<String>,
    pub file_path: Option<String>,
    pub queue_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "PersistenceSection::default_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,
}

impl PersistenceSection {
    fn default_drain_timeout_ms() -> u64 {
        2_000
    }
}

impl From<&PersistenceSection> for PersistenceConfig {
    fn from(section: &PersistenceSection) -> Self {
        Self {
            queue_capacity: section.queue_capacity,
            overflow_policy: section.overflow_policy,
            shutdown_drain_timeout_ms: section.shutdown_drain_timeout_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewaySection {
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentPolicyConfig {
    pub mode: IntentMode,
    pub notional_usd: f64,
    pub limit_offset_bps: f64,
    pub min_edge_bps: f64,
    pub maker_fee_bps: f64,
    pub taker_fee_bps: f64,
    pub post_only: bool,
    pub reduce_only: bool,
    pub tif: Tif,
    pub cooldown_ms: i64,
    pub dedupe_window_ms: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub half_open_max_successes: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub ack_timeout_ms: i64,
    pub fill_timeout_ms: i64,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReliabilitySection {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub reconciliation: ReconciliationConfig,
}

impl From<&ReliabilitySection> for ReliabilityConfig {
    fn from(section: &ReliabilitySection) -> Self {
        Self {
            max_attempts: section.retry.max_attempts,
            base_delay_ms: section.retry.base_delay_ms,
            max_delay_ms: section.retry.max_delay_ms,
            jitter: section.retry.jitter,
            failure_threshold: section.circuit_breaker.failure_threshold,
            cooldown_ms: section.circuit_breaker.cooldown_ms,
            half_open_max_successes: section.circuit_breaker.half_open_max_successes,
        }
    }
}

impl From<&ReliabilitySection> for ReconcilerConfig {
    fn from(section: &ReliabilitySection) -> Self {
        Self {
            ack_timeout_ms: section.reconciliation.ack_timeout_ms,
            fill_timeout_ms: section.reconciliation.fill_timeout_ms,
            poll_interval_ms: section.reconciliation.poll_interval_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionSection {
    pub account: String,
    pub policy: IntentPolicyConfig,
    pub reliability: ReliabilitySection,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExitSection {
    pub time_enabled: bool,
    pub max_hold_ms: Option<i64>,
    pub min_hold_ms: i64,
    pub max_symbol_exposure_usd: Option<f64>,
    pub max_gross_exposure_usd: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub margin_buffer_pct: Option<f64>,
    pub risk_action: RiskActionConfig,
    pub epsilon_bps: f64,
    pub sigma_lookback_sec: i64,
    pub tp_sigma: f64,
    pub sl_sigma: f64,
    pub init_arm_pnl_sigmas: f64,
    pub retrace_pct: f64,
}

impl From<&ExitSection> for ExitConfig {
    fn from(section: &ExitSection) -> Self {
        Self {
            max_symbol_exposure_usd: section.max_symbol_exposure_usd,
            max_gross_exposure_usd: section.max_gross_exposure_usd,
            max_drawdown_pct: section.max_drawdown_pct,
            margin_buffer_pct: section.margin_buffer_pct,
            risk_action: section.risk_action,
            min_hold_ms: section.min_hold_ms,
            max_hold_ms: if section.time_enabled { section.max_hold_ms } else { None },
            epsilon_bps: section.epsilon_bps,
            sigma_lookback_sec: section.sigma_lookback_sec,
            tp_sigma: section.tp_sigma,
            sl_sigma: section.sl_sigma,
            init_arm_pnl_sigmas: section.init_arm_pnl_sigmas,
            retrace_pct: section.retrace_pct,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub trade_symbol: String,
    pub primary_feed: String,
    #[serde(default)]
    pub extra_feeds: Vec<String>,
    pub params: serde_json::Value,
    pub mode: StrategyMode,
    pub priority: u32,
    pub budget: Option<RiskConfig>,
    pub exit: Option<ExitSection>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    Live,
    Sandbox,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountingSection {
    pub seed_demo_balance: HashMap<String, f64>,
    pub balance_sync_interval_ms: u64,
    pub balance_sync_max_drift_bps: f64,
    pub balance_sync_mutates_ledger: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalanceTarget {
    pub asset: String,
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalancerExecutor {
    pub auto: bool,
    pub mode: IntentMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebalancerSection {
    pub targets: Vec<RebalanceTarget>,
    pub interval_ms: u64,
    pub executor: RebalancerExecutor,
}

pub use crate::risk::PriceBand as ConfiguredPriceBand;
pub use crate::risk::Throttle as ConfiguredThrottle;
