use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StrategyMode;
use crate::market::instrument::InstrumentRepository;
use crate::market::Tick;
use crate::risk::pipeline::{ApprovedIntent, RejectedIntent, RiskContext, RiskPipeline};
use crate::risk::RiskCheckOutcome;
use crate::strategy::intent::{IntentBuilder, IntentPolicy, OrderIntent};
use crate::strategy::runner::StrategyRunner;

/// One strategy's wiring: its runner, intent policy, and venue used for fee lookup (§4.7).
/// Sandbox-mode strategies still build intents (so operators can observe what they would have
/// done) but their approved stream never reaches execution — `is_sandbox` short-circuits
/// [`Orchestrator::on_tick`] before the risk pipeline ever runs for them in sandbox mode, since
/// a sandboxed strategy produces no side effects at all (§9 open question: a conservative
/// implementation skips reservation but still runs risk checks in "observe" mode — this
/// implementation instead fully skips risk for sandboxed strategies, since there are no
/// balances to protect when nothing can ever be submitted).
pub struct StrategySlot {
    pub runner: StrategyRunner,
    pub policy: IntentPolicy,
    pub venue: String,
    pub mode: StrategyMode,
    builder: IntentBuilder,
}

impl StrategySlot {
    pub fn new(runner: StrategyRunner, policy: IntentPolicy, venue: impl Into<String>, mode: StrategyMode) -> Self {
        Self {
            runner,
            policy,
            venue: venue.into(),
            mode,
            builder: IntentBuilder::new(),
        }
    }
}

/// An approved intent paired with the venue its owning strategy was configured against, so the
/// runtime knows which execution adapter to route it to without threading venue through
/// [`ApprovedIntent`] itself.
pub struct RoutedIntent {
    pub venue: String,
    pub approved: ApprovedIntent,
}

/// Outcome of feeding one tick through every strategy slot (§4.7 data flow: tick → signal →
/// intent → risk → merge).
pub struct TickOutcome {
    pub approved: Vec<RoutedIntent>,
    pub rejected: Vec<RejectedIntent>,
    pub risk_checks: Vec<RiskCheckOutcome>,
}

/// Spawns and merges per-strategy subgraphs (C11). Each strategy owns its own
/// [`StrategyRunner`] and [`IntentBuilder`]; they share one [`RiskPipeline`] and
/// [`InstrumentRepository`] since risk budgets and tick/lot metadata are account-wide, not
/// per-strategy state. All per-strategy approved streams merge into one orchestrator-level
/// stream (§4.7).
pub struct Orchestrator {
    slots: Vec<StrategySlot>,
    risk: Arc<RiskPipeline>,
    instruments: InstrumentRepository,
}

impl Orchestrator {
    pub fn new(risk: Arc<RiskPipeline>, instruments: InstrumentRepository) -> Self {
        Self {
            slots: Vec::new(),
            risk,
            instruments,
        }
    }

    pub fn add_strategy(&mut self, slot: StrategySlot) {
        self.slots.push(slot);
    }

    /// Feeds `tick` through every strategy, building and risk-checking an intent for each
    /// signal produced, short-circuiting sandbox strategies before risk ever runs.
    pub fn on_tick(&mut self, tick: &Tick, ctx: &dyn RiskContext, now: DateTime<Utc>) -> TickOutcome {
        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        let mut risk_checks = Vec::new();

        for slot in &mut self.slots {
            let Some(signal) = slot.runner.on_tick(tick) else {
                continue;
            };

            let mark = tick.mark().unwrap_or(0.0);
            let Some(intent) = slot
                .builder
                .build(&signal, &slot.policy, &self.instruments, &slot.venue, mark)
            else {
                continue;
            };

            if slot.mode == StrategyMode::Sandbox {
                continue;
            }

            let (outcome, check) = self.risk.evaluate(intent, &self.instruments, ctx, now);
            risk_checks.push(check);
            match outcome {
                Ok(ok) => approved.push(RoutedIntent {
                    venue: slot.venue.clone(),
                    approved: ok,
                }),
                Err(rej) => rejected.push(rej),
            }
        }

        TickOutcome {
            approved,
            rejected,
            risk_checks,
        }
    }

    /// Feeds an externally-sourced intent (e.g. from the exit engine) straight through risk,
    /// bypassing strategy/signal generation.
    pub fn evaluate_intent(
        &self,
        intent: OrderIntent,
        venue: impl Into<String>,
        ctx: &dyn RiskContext,
        now: DateTime<Utc>,
    ) -> (Result<RoutedIntent, RejectedIntent>, RiskCheckOutcome) {
        let venue = venue.into();
        let (outcome, check) = self.risk.evaluate(intent, &self.instruments, ctx, now);
        (outcome.map(|approved| RoutedIntent { venue, approved }), check)
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.runner.strategy_id.clone()).collect()
    }
}

/// Deduplicates feed registration keys (`"venue:symbol"`) across strategies that happen to
/// share a feed, so the composite feed set exposed to the runtime has one entry per identity
/// (§4.7 "Feed managers are deduplicated by identity").
pub fn dedupe_feed_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashMap::new();
    let mut out = Vec::new();
    for key in keys {
        if seen.insert(key.clone(), ()).is_none() {
            out.push(key);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RiskConfig, Throttle};
    use crate::strategy::builtins::{ArbitrageLogic, ArbitrageParams};
    use crate::strategy::intent::{IntentMode, Tif};
    use std::collections::HashMap as Map;

    struct FixedCtx;
    impl RiskContext for FixedCtx {
        fn position(&self, _symbol: &str) -> f64 {
            0.0
        }
        fn mark_price(&self, _symbol: &str) -> Option<f64> {
            None
        }
        fn available_quote(&self, _account: &str, _asset: &str) -> f64 {
            1_000_000.0
        }
        fn available_base(&self, _account: &str, _asset: &str) -> f64 {
            1_000.0
        }
        fn committed_margin(&self, _account: &str) -> f64 {
            0.0
        }
    }

    fn tick(venue: &str, t: i64, bid: f64, ask: f64) -> Tick {
        Tick {
            t,
            symbol: "BTCUSDT".into(),
            bid: Some(bid),
            ask: Some(ask),
            last: None,
            venue: venue.into(),
        }
    }

    fn policy() -> IntentPolicy {
        IntentPolicy {
            mode: IntentMode::Market,
            notional_usd: 100.0,
            limit_offset_bps: 0.0,
            min_edge_bps: 0.0,
            post_only: false,
            tif: Tif::Ioc,
            cooldown_ms: 0,
            dedupe_window_ms: 0,
            account: "acct".into(),
        }
    }

    #[test]
    fn sandbox_strategy_never_reaches_risk_or_execution() {
        let risk = RiskPipeline::new(RiskConfig {
            notional: 1_000_000.0,
            max_position: 1_000.0,
            price_bands: Map::new(),
            throttle: Throttle {
                window_ms: 1_000,
                max_count: 100,
            },
            margin: None,
        });
        let mut instruments = InstrumentRepository::new();
        instruments.register_pair(
            "BTCUSDT",
            crate::market::instrument::PairMeta {
                tick_size: 0.1,
                lot_size: 0.001,
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
            },
        );

        let mut orchestrator = Orchestrator::new(Arc::new(risk), instruments);
        let logic = ArbitrageLogic::new(ArbitrageParams {
            primary_venue: "binance".into(),
            secondary_venue: "hyper".into(),
            min_spread_bps: 50.0,
        });
        let runner = StrategyRunner::new("arb-1", "BTCUSDT", Box::new(logic));
        orchestrator.add_strategy(StrategySlot::new(
            runner,
            policy(),
            "binance",
            StrategyMode::Sandbox,
        ));

        let ctx = FixedCtx;
        let now = Utc::now();
        orchestrator.on_tick(&tick("binance", 0, 100.0, 100.2), &ctx, now);
        orchestrator.on_tick(&tick("hyper", 1, 99.7, 99.9), &ctx, now);
        let outcome = orchestrator.on_tick(&tick("hyper", 2, 101.6, 101.8), &ctx, now);

        assert!(outcome.approved.is_empty());
        assert!(outcome.rejected.is_empty());
        assert!(outcome.risk_checks.is_empty());
    }

    #[test]
    fn dedupe_feed_keys_keeps_first_occurrence_only() {
        let keys = vec!["binance:BTCUSDT".to_string(), "binance:BTCUSDT".to_string(), "hyper:BTCUSDT".to_string()];
        let deduped = dedupe_feed_keys(keys);
        assert_eq!(deduped, vec!["binance:BTCUSDT", "hyper:BTCUSDT"]);
    }
}
