use serde::Deserialize;
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::market::Tick;
use crate::strategy::intent::Side;
use crate::strategy::runner::{StrategyContext, StrategyLogic};
use crate::strategy::signal::Signal;

/// Params for the momentum family: fast/slow SMA crossover on mark price.
#[derive(Clone, Debug, Deserialize)]
pub struct MomentumParams {
    pub fast_window: usize,
    pub slow_window: usize,
}

/// Fast/slow moving-average crossover strategy (§4.5 "momentum (fast/slow windows)").
/// Long when the fast average crosses above the slow average, short on the reverse cross.
pub struct MomentumLogic {
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    prev_fast_above_slow: Option<bool>,
}

impl MomentumLogic {
    pub fn new(params: MomentumParams) -> Self {
        Self {
            fast: SimpleMovingAverage::new(params.fast_window as usize)
                .expect("fast_window must be >= 1"),
            slow: SimpleMovingAverage::new(params.slow_window as usize)
                .expect("slow_window must be >= 1"),
            prev_fast_above_slow: None,
        }
    }
}

impl StrategyLogic for MomentumLogic {
    fn on_tick(&mut self, ctx: &StrategyContext<'_>) -> Option<Signal> {
        let mark = ctx.trigger.mark()?;
        let fast = self.fast.next(mark);
        let slow = self.slow.next(mark);
        let fast_above_slow = fast > slow;

        let crossed = match self.prev_fast_above_slow {
            None => None,
            Some(prev) if prev != fast_above_slow => Some(fast_above_slow),
            Some(_) => None,
        };
        self.prev_fast_above_slow = Some(fast_above_slow);

        let action = match crossed? {
            true => Side::Buy,
            false => Side::Sell,
        };

        Some(Signal {
            strategy_id: String::new(),
            symbol: String::new(),
            action,
            px: Some(mark),
            t: chrono::DateTime::from_timestamp_millis(ctx.trigger.t).unwrap_or_else(chrono::Utc::now),
        })
    }
}

/// Params for the arbitrage family (§4.5 "arbitrage (primary vs secondary venue with spread
/// in bps)").
#[derive(Clone, Debug, Deserialize)]
pub struct ArbitrageParams {
    pub primary_venue: String,
    pub secondary_venue: String,
    pub min_spread_bps: f64,
}

/// Cross-venue arbitrage: buys on the venue quoting the lower ask when the spread between
/// venues exceeds `min_spread_bps`.
pub struct ArbitrageLogic {
    params: ArbitrageParams,
}

impl ArbitrageLogic {
    pub fn new(params: ArbitrageParams) -> Self {
        Self { params }
    }

    fn spread_bps(primary: &Tick, secondary: &Tick) -> Option<(f64, Side)> {
        let primary_ask = primary.ask?;
        let secondary_bid = secondary.bid?;
        let primary_bid = primary.bid?;
        let secondary_ask = secondary.ask?;

        // Buy primary / sell secondary if primary ask is cheap relative to secondary bid.
        let buy_primary_spread = (secondary_bid - primary_ask) / primary_ask * 10_000.0;
        // Buy secondary / sell primary if secondary ask is cheap relative to primary bid.
        let buy_secondary_spread = (primary_bid - secondary_ask) / secondary_ask * 10_000.0;

        if buy_primary_spread >= buy_secondary_spread {
            Some((buy_primary_spread, Side::Buy))
        } else {
            Some((buy_secondary_spread, Side::Sell))
        }
    }
}

impl StrategyLogic for ArbitrageLogic {
    fn on_tick(&mut self, ctx: &StrategyContext<'_>) -> Option<Signal> {
        let primary = ctx.latest_by_venue.get(&self.params.primary_venue)?;
        let secondary = ctx.latest_by_venue.get(&self.params.secondary_venue)?;

        let (spread_bps, action) = Self::spread_bps(primary, secondary)?;
        if spread_bps < self.params.min_spread_bps {
            return None;
        }

        let px = ctx.trigger.mark()?;
        Some(Signal {
            strategy_id: String::new(),
            symbol: String::new(),
            action,
            px: Some(px),
            t: chrono::DateTime::from_timestamp_millis(ctx.trigger.t).unwrap_or_else(chrono::Utc::now),
        })
    }
}
