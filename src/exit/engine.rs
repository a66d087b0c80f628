use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::intent::{IntentMeta, OrderIntent, OrderType, Side, Tif};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    RiskSymbol,
    RiskGross,
    RiskDrawdown,
    RiskMargin,
    Time,
    SignalFlip,
    FairValue,
    TakeProfit,
    StopLoss,
    Trailing,
}

impl ExitReason {
    pub fn as_code(self) -> &'static str {
        match self {
            ExitReason::RiskSymbol => "EXIT_RISK_SYMBOL",
            ExitReason::RiskGross => "EXIT_RISK_GROSS",
            ExitReason::RiskDrawdown => "EXIT_RISK_DRAWDOWN",
            ExitReason::RiskMargin => "EXIT_RISK_MARGIN",
            ExitReason::Time => "EXIT_TIME",
            ExitReason::SignalFlip => "EXIT_SIGNAL_FLIP",
            ExitReason::FairValue => "EXIT_FAIR_VALUE",
            ExitReason::TakeProfit => "EXIT_TP",
            ExitReason::StopLoss => "EXIT_SL",
            ExitReason::Trailing => "EXIT_TRAILING",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum RiskAction {
    CloseSymbol,
    FlattenAll,
}

/// Per-strategy exit parameters (§4.12, §6 strategy `exit` block).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExitConfig {
    pub max_symbol_exposure_usd: Option<f64>,
    pub max_gross_exposure_usd: Option<f64>,
    pub max_drawdown_pct: Option<f64>,
    pub margin_buffer_pct: Option<f64>,
    pub risk_action: RiskActionConfig,
    pub min_hold_ms: i64,
    pub max_hold_ms: Option<i64>,
    pub epsilon_bps: f64,
    pub sigma_lookback_sec: i64,
    pub tp_sigma: f64,
    pub sl_sigma: f64,
    pub init_arm_pnl_sigmas: f64,
    pub retrace_pct: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum RiskActionConfig {
    CloseSymbol,
    FlattenAll,
}

impl From<RiskActionConfig> for RiskAction {
    fn from(value: RiskActionConfig) -> Self {
        match value {
            RiskActionConfig::CloseSymbol => RiskAction::CloseSymbol,
            RiskActionConfig::FlattenAll => RiskAction::FlattenAll,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PositionState {
    Flat,
    Open {
        entry_time: DateTime<Utc>,
        dir: Side,
        avg_px: f64,
        peak: f64,
        trough: f64,
        armed: bool,
    },
}

struct SymbolCycle {
    state: PositionState,
    last_px: Option<f64>,
    returns: VecDeque<f64>,
    pending_reasons: std::collections::HashSet<ExitReason>,
}

impl SymbolCycle {
    fn new() -> Self {
        Self {
            state: PositionState::Flat,
            last_px: None,
            returns: VecDeque::new(),
            pending_reasons: std::collections::HashSet::new(),
        }
    }
}

/// Generates exit intents from position + price + signal + portfolio analytics (C18). Runs a
/// {Flat → Open → Exiting} state machine per `(strategy, symbol)` cycle, resetting once the
/// position returns to flat, and suppresses duplicate exit reasons until that reset (§4.12).
pub struct ExitEngine {
    config: ExitConfig,
    cycles: HashMap<String, SymbolCycle>,
}

impl ExitEngine {
    pub fn new(config: ExitConfig) -> Self {
        Self {
            config,
            cycles: HashMap::new(),
        }
    }

    fn cycle(&mut self, symbol: &str) -> &mut SymbolCycle {
        self.cycles
            .entry(symbol.to_string())
            .or_insert_with(SymbolCycle::new)
    }

    /// Tells the engine a position opened or closed, driving the {Flat → Open} transition and
    /// the reset back to Flat (§4.12's state machine).
    pub fn on_position_change(&mut self, symbol: &str, pos: f64, avg_px: f64, t: DateTime<Utc>) {
        let cycle = self.cycle(symbol);
        if pos == 0.0 {
            cycle.state = PositionState::Flat;
            cycle.pending_reasons.clear();
            return;
        }
        if !matches!(cycle.state, PositionState::Open { .. }) {
            cycle.state = PositionState::Open {
                entry_time: t,
                dir: if pos > 0.0 { Side::Buy } else { Side::Sell },
                avg_px,
                peak: avg_px,
                trough: avg_px,
                armed: false,
            };
        }
    }

    fn sigma_of(returns: &[f64]) -> f64 {
        let n = returns.len();
        if n < 2 {
            return 0.0;
        }
        let mean = returns.iter().sum::<f64>() / n as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        variance.sqrt()
    }

    fn max_samples(&self) -> usize {
        (self.config.sigma_lookback_sec / 2).max(2) as usize
    }

    /// Evaluates exit conditions for `symbol` given the current mark, strategy signal-flip
    /// flag, and analytics; returns a single exit `OrderIntent` for the first matching reason
    /// not already pending this cycle, or `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &mut self,
        strategy_id: &str,
        symbol: &str,
        px: f64,
        t: DateTime<Utc>,
        signal_flipped: bool,
        signal_px: Option<f64>,
        symbol_notional_usd: f64,
        gross_notional_usd: f64,
        drawdown_pct: f64,
        margin_buffer_pct: f64,
    ) -> Option<OrderIntent> {
        let sample_cap = self.max_samples();
        let cycle = self.cycle(symbol);

        let (entry_time, dir, avg_px) = match cycle.state {
            PositionState::Flat => return None,
            PositionState::Open {
                entry_time,
                dir,
                avg_px,
                ..
            } => (entry_time, dir, avg_px),
        };

        if let Some(last_px) = cycle.last_px {
            if last_px > 0.0 && px > 0.0 {
                cycle.returns.push_back((px / last_px).ln());
                while cycle.returns.len() > sample_cap {
                    cycle.returns.pop_front();
                }
            }
        }
        cycle.last_px = Some(px);

        let mut reason = None;

        // 1. Risk override.
        if let Some(cap) = self.config.max_symbol_exposure_usd {
            if symbol_notional_usd.abs() > cap {
                reason = Some(ExitReason::RiskSymbol);
            }
        }
        if reason.is_none() {
            if let Some(cap) = self.config.max_gross_exposure_usd {
                if gross_notional_usd.abs() > cap {
                    reason = Some(ExitReason::RiskGross);
                }
            }
        }
        if reason.is_none() {
            if let Some(cap) = self.config.max_drawdown_pct {
                if drawdown_pct.abs() > cap {
                    reason = Some(ExitReason::RiskDrawdown);
                }
            }
        }
        if reason.is_none() {
            if let Some(buffer) = self.config.margin_buffer_pct {
                if margin_buffer_pct < buffer {
                    reason = Some(ExitReason::RiskMargin);
                }
            }
        }

        // 2. Time stop.
        let held_ms = (t - entry_time).num_milliseconds();
        if reason.is_none() && held_ms >= self.config.min_hold_ms {
            if let Some(max_hold) = self.config.max_hold_ms {
                if held_ms >= max_hold {
                    reason = Some(ExitReason::Time);
                }
            }
        }

        // 3. Fair value.
        if reason.is_none() && signal_flipped {
            reason = Some(ExitReason::SignalFlip);
        }
        if reason.is_none() {
            if let Some(signal_px) = signal_px {
                if signal_px > 0.0 {
                    let diff_bps = ((px - signal_px) / signal_px).abs() * 10_000.0;
                    if diff_bps <= self.config.epsilon_bps {
                        reason = Some(ExitReason::FairValue);
                    }
                }
            }
        }

        // 4. TP/SL via rolling sigma of log returns.
        let returns_snapshot: Vec<f64> = self.cycle(symbol).returns.iter().copied().collect();
        let sigma = Self::sigma_of(&returns_snapshot);
        let favorable_return = match dir {
            Side::Buy => (px - avg_px) / avg_px,
            Side::Sell => (avg_px - px) / avg_px,
        };
        if reason.is_none() && sigma > 0.0 {
            if favorable_return >= self.config.tp_sigma * sigma {
                reason = Some(ExitReason::TakeProfit);
            } else if favorable_return <= -self.config.sl_sigma * sigma {
                reason = Some(ExitReason::StopLoss);
            }
        }

        // 5. Trailing stop.
        let cycle = self.cycle(symbol);
        if let PositionState::Open {
            peak: p,
            trough: tr,
            armed,
            ..
        } = &mut cycle.state
        {
            let new_peak = p.max(px);
            let new_trough = tr.min(px);
            *p = new_peak;
            *tr = new_trough;

            if !*armed && sigma > 0.0 && favorable_return >= self.config.init_arm_pnl_sigmas * sigma {
                *armed = true;
            }

            if reason.is_none() && *armed {
                let retrace = match dir {
                    Side::Buy => {
                        if new_peak > 0.0 {
                            (new_peak - px) / new_peak
                        } else {
                            0.0
                        }
                    }
                    Side::Sell => {
                        if new_trough > 0.0 {
                            (px - new_trough) / new_trough
                        } else {
                            0.0
                        }
                    }
                };
                if retrace >= self.config.retrace_pct {
                    reason = Some(ExitReason::Trailing);
                }
            }
        }

        let reason = reason?;
        let cycle = self.cycle(symbol);
        if !cycle.pending_reasons.insert(reason) {
            return None;
        }

        let exit_side = dir.opposite();
        Some(OrderIntent {
            id: Uuid::new_v4(),
            t,
            symbol: symbol.to_string(),
            side: exit_side,
            qty: 0.0,
            order_type: OrderType::Mkt,
            tif: Tif::Ioc,
            account: String::new(),
            px: None,
            meta: IntentMeta {
                strategy_id: Some(strategy_id.to_string()),
                exit: Some(true),
                reason: Some(reason.as_code().to_string()),
                expected_fee_bps: None,
                liquidity: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExitConfig {
        ExitConfig {
            max_symbol_exposure_usd: None,
            max_gross_exposure_usd: None,
            max_drawdown_pct: None,
            margin_buffer_pct: None,
            risk_action: RiskActionConfig::CloseSymbol,
            min_hold_ms: 0,
            max_hold_ms: Some(500),
            epsilon_bps: 1.0,
            sigma_lookback_sec: 20,
            tp_sigma: 3.0,
            sl_sigma: 3.0,
            init_arm_pnl_sigmas: 3.0,
            retrace_pct: 0.5,
        }
    }

    #[test]
    fn time_stop_fires_a_sell_exit_after_max_hold() {
        let mut engine = ExitEngine::new(config());
        let t0 = Utc::now();
        engine.on_position_change("BTCUSDT", 0.5, 100.1, t0);

        let none_yet = engine.evaluate(
            "s1", "BTCUSDT", 100.1, t0, false, None, 0.0, 0.0, 0.0, 1.0,
        );
        assert!(none_yet.is_none());

        let t1 = t0 + chrono::Duration::milliseconds(600);
        let exit = engine
            .evaluate("s1", "BTCUSDT", 100.2, t1, false, None, 0.0, 0.0, 0.0, 1.0)
            .unwrap();
        assert_eq!(exit.side, Side::Sell);
        assert_eq!(exit.meta.reason.as_deref(), Some("EXIT_TIME"));
        assert!(exit.meta.exit.unwrap());
    }

    #[test]
    fn duplicate_reason_is_suppressed_until_position_resets() {
        let mut engine = ExitEngine::new(config());
        let t0 = Utc::now();
        engine.on_position_change("BTCUSDT", 0.5, 100.0, t0);
        let t1 = t0 + chrono::Duration::milliseconds(600);

        let first = engine.evaluate("s1", "BTCUSDT", 100.0, t1, false, None, 0.0, 0.0, 0.0, 1.0);
        assert!(first.is_some());
        let second = engine.evaluate("s1", "BTCUSDT", 100.0, t1, false, None, 0.0, 0.0, 0.0, 1.0);
        assert!(second.is_none());

        engine.on_position_change("BTCUSDT", 0.0, 0.0, t1);
        engine.on_position_change("BTCUSDT", 0.5, 100.0, t1);
        let after_reset = engine.evaluate("s1", "BTCUSDT", 100.0, t1, false, None, 0.0, 0.0, 0.0, 1.0);
        assert!(after_reset.is_some());
    }

    #[test]
    fn risk_override_wins_over_time_stop() {
        let mut cfg = config();
        cfg.max_symbol_exposure_usd = Some(1_000.0);
        let mut engine = ExitEngine::new(cfg);
        let t0 = Utc::now();
        engine.on_position_change("BTCUSDT", 0.5, 100.0, t0);
        let t1 = t0 + chrono::Duration::milliseconds(600);

        let exit = engine
            .evaluate("s1", "BTCUSDT", 100.0, t1, false, None, 5_000.0, 0.0, 0.0, 1.0)
            .unwrap();
        assert_eq!(exit.meta.reason.as_deref(), Some("EXIT_RISK_SYMBOL"));
    }
}
