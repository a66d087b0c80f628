use std::collections::HashMap;

use crate::market::Tick;
use crate::strategy::signal::Signal;

/// Context available to a strategy on every tick: the tick that triggered evaluation plus the
/// latest tick seen from every venue feeding this strategy (used by cross-venue strategies
/// like arbitrage).
pub struct StrategyContext<'a> {
    pub trigger: &'a Tick,
    pub latest_by_venue: &'a HashMap<String, Tick>,
}

/// Pure per-strategy signal-generation function (C8): `(ticks, context, params) -> signals`.
/// Implementations hold only their own indicator state — no shared mutable state, matching
/// §3's ownership rule that strategies own no shared mutable state.
pub trait StrategyLogic: Send {
    fn on_tick(&mut self, ctx: &StrategyContext<'_>) -> Option<Signal>;
}

/// Produces a lazy sequence of signals from a strategy's tick stream (C8). Owns the
/// `StrategyLogic` instance and the per-venue "latest tick" cache used for cross-venue
/// context; has no reference to any other strategy or component (§9 "no participant holds a
/// reference to the other").
pub struct StrategyRunner {
    pub strategy_id: String,
    pub symbol: String,
    logic: Box<dyn StrategyLogic>,
    latest_by_venue: HashMap<String, Tick>,
}

impl StrategyRunner {
    pub fn new(strategy_id: impl Into<String>, symbol: impl Into<String>, logic: Box<dyn StrategyLogic>) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            logic,
            latest_by_venue: HashMap::new(),
        }
    }

    /// Feeds one tick through the strategy. Ticks for symbols this strategy doesn't trade are
    /// ignored (still updating the cross-venue cache when relevant to the configured symbol).
    pub fn on_tick(&mut self, tick: &Tick) -> Option<Signal> {
        if tick.symbol != self.symbol {
            return None;
        }
        self.latest_by_venue
            .insert(tick.venue.clone(), tick.clone());

        let ctx = StrategyContext {
            trigger: tick,
            latest_by_venue: &self.latest_by_venue,
        };

        let mut signal = self.logic.on_tick(&ctx)?;
        signal.strategy_id = self.strategy_id.clone();
        signal.symbol = self.symbol.clone();
        Some(signal)
    }
}
