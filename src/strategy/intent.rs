use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market::instrument::InstrumentRepository;
use crate::strategy::signal::Signal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Mkt,
    Lmt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tif {
    Ioc,
    Fok,
    Gtc,
    Day,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liquidity {
    Maker,
    Taker,
}

/// §3 `OrderIntent.meta`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentMeta {
    pub strategy_id: Option<String>,
    pub exit: Option<bool>,
    pub reason: Option<String>,
    pub expected_fee_bps: Option<f64>,
    pub liquidity: Option<Liquidity>,
}

/// A proposed order prior to risk approval (§3 `OrderIntent`/`OrderNew`). Created by the
/// intent builder (C9) or the exit engine (C18); immutable once constructed, with a unique
/// `id` that threads through risk, execution, and fills.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub t: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub order_type: OrderType,
    pub tif: Tif,
    pub account: String,
    pub px: Option<f64>,
    pub meta: IntentMeta,
}

impl OrderIntent {
    pub fn is_valid(&self) -> bool {
        self.qty > 0.0 && (self.order_type == OrderType::Mkt || self.px.is_some())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentMode {
    Market,
    MakerPreferred,
    Taker,
}

/// §4.5 per-strategy intent-building policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IntentPolicy {
    pub mode: IntentMode,
    pub notional_usd: f64,
    pub limit_offset_bps: f64,
    pub min_edge_bps: f64,
    pub post_only: bool,
    pub tif: Tif,
    pub cooldown_ms: i64,
    pub dedupe_window_ms: i64,
    pub account: String,
}

#[derive(Clone, Copy, PartialEq)]
struct LastIntentKey {
    side: Side,
    px: f64,
    qty: f64,
}

struct StrategyIntentHistory {
    last_emitted_t: Option<DateTime<Utc>>,
    last_dedupe_key: Option<(LastIntentKey, DateTime<Utc>)>,
}

/// Translates [`Signal`]s into [`OrderIntent`]s (C9): quantizes price/quantity, suppresses
/// intents within `cooldown_ms` of the previous emitted intent for the same
/// `(strategy, symbol)`, deduplicates identical `(side, rounded-px, qty)` within
/// `dedupe_window_ms`, and attaches `expected_fee_bps` from the active fee schedule (§4.5).
pub struct IntentBuilder {
    history: HashMap<(String, String), StrategyIntentHistory>,
}

impl IntentBuilder {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }

    /// Builds an intent from `signal` under `policy`, or `None` if cooldown/dedupe suppresses
    /// it. `instruments` supplies tick/lot size and fee schedule lookups; `mark` is the
    /// current reference price used when `signal.px` is absent (market mode).
    pub fn build(
        &mut self,
        signal: &Signal,
        policy: &IntentPolicy,
        instruments: &InstrumentRepository,
        venue: &str,
        mark: f64,
    ) -> Option<OrderIntent> {
        let key = (signal.strategy_id.clone(), signal.symbol.clone());
        let entry = self
            .history
            .entry(key.clone())
            .or_insert_with(|| StrategyIntentHistory {
                last_emitted_t: None,
                last_dedupe_key: None,
            });

        if let Some(last_t) = entry.last_emitted_t {
            if (signal.t - last_t).num_milliseconds() < policy.cooldown_ms {
                return None;
            }
        }

        if let (Some(signal_px), true) = (signal.px, mark > 0.0) {
            let edge_bps = match signal.action {
                Side::Buy => (mark - signal_px) / mark * 10_000.0,
                Side::Sell => (signal_px - mark) / mark * 10_000.0,
            };
            if edge_bps < policy.min_edge_bps {
                return None;
            }
        }

        let raw_px = match policy.mode {
            IntentMode::Market => mark,
            IntentMode::MakerPreferred | IntentMode::Taker => {
                let offset = mark * policy.limit_offset_bps / 10_000.0;
                match signal.action {
                    Side::Buy => mark - offset,
                    Side::Sell => mark + offset,
                }
            }
        };

        let raw_qty = if raw_px > 0.0 {
            policy.notional_usd / raw_px
        } else {
            0.0
        };

        let (px, qty) = instruments
            .quantize(&signal.symbol, raw_px, raw_qty)
            .unwrap_or((raw_px, raw_qty));

        if qty <= 0.0 {
            return None;
        }

        let dedupe_key = LastIntentKey {
            side: signal.action,
            px,
            qty,
        };
        if let Some((last_key, last_t)) = entry.last_dedupe_key {
            if last_key == dedupe_key
                && (signal.t - last_t).num_milliseconds() < policy.dedupe_window_ms
            {
                return None;
            }
        }

        let liquidity = match policy.mode {
            IntentMode::Taker | IntentMode::Market => Liquidity::Taker,
            IntentMode::MakerPreferred => {
                if policy.post_only {
                    Liquidity::Maker
                } else {
                    Liquidity::Taker
                }
            }
        };

        let expected_fee_bps = instruments
            .fee_schedule(venue, &signal.symbol)
            .map(|schedule| match liquidity {
                Liquidity::Maker => schedule.maker_bps,
                Liquidity::Taker => schedule.taker_bps,
            });

        let order_type = match policy.mode {
            IntentMode::Market => OrderType::Mkt,
            _ => OrderType::Lmt,
        };

        let intent = OrderIntent {
            id: Uuid::new_v4(),
            t: signal.t,
            symbol: signal.symbol.clone(),
            side: signal.action,
            qty,
            order_type,
            tif: policy.tif,
            account: policy.account.clone(),
            px: if order_type == OrderType::Mkt {
                None
            } else {
                Some(px)
            },
            meta: IntentMeta {
                strategy_id: Some(signal.strategy_id.clone()),
                exit: Some(false),
                reason: None,
                expected_fee_bps,
                liquidity: Some(liquidity),
            },
        };

        entry.last_emitted_t = Some(signal.t);
        entry.last_dedupe_key = Some((dedupe_key, signal.t));

        Some(intent)
    }
}

impl Default for IntentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
