//! End-to-end scenarios exercising the full tick -> signal -> intent -> risk -> fill -> portfolio
//! pipeline and the event-log replay path, the two integration-level properties that don't live
//! naturally inside any single module's unit tests.

use chrono::{Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use velum_trader::account::fill_accounting::adjustments_for_fill;
use velum_trader::account::AccountState;
use velum_trader::config::StrategyMode;
use velum_trader::event::{DomainEvent, EventPayload, Fill};
use velum_trader::market::instrument::{FeeSchedule, InstrumentRepository, PairMeta, ProductType};
use velum_trader::market::Tick;
use velum_trader::orchestrator::{Orchestrator, StrategySlot};
use velum_trader::portfolio::projection::PortfolioProjection;
use velum_trader::portfolio::PortfolioSnapshot;
use velum_trader::risk::pipeline::{RiskContext, RiskPipeline};
use velum_trader::risk::{RiskConfig, Throttle};
use velum_trader::strategy::builtins::{ArbitrageLogic, ArbitrageParams};
use velum_trader::strategy::intent::{IntentMode, IntentPolicy, Liquidity, Side, Tif};
use velum_trader::strategy::runner::StrategyRunner;

struct PermissiveCtx;

impl RiskContext for PermissiveCtx {
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

fn btcusdt_instruments() -> InstrumentRepository {
    let mut repo = InstrumentRepository::new();
    repo.register_pair(
        "BTCUSDT",
        PairMeta {
            tick_size: 0.1,
            lot_size: 0.001,
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
        },
    );
    repo.register_fee_schedule(FeeSchedule {
        venue: "binance".into(),
        symbol: None,
        product_type: ProductType::Spot,
        maker_bps: 8.0,
        taker_bps: 12.0,
        effective_from: Utc::now(),
        source: "test".into(),
    });
    repo
}

/// A widening cross-venue spread produces exactly one approved maker-preferred buy, and the
/// resulting fill flows through to balance adjustments and portfolio P&L.
#[test]
fn arbitrage_tick_to_order_to_fill_to_pnl() {
    let risk = RiskPipeline::new(RiskConfig {
        notional: 1_000_000.0,
        max_position: 1_000.0,
        price_bands: HashMap::new(),
        throttle: Throttle {
            window_ms: 1_000,
            max_count: 100,
        },
        margin: None,
    });
    let instruments = btcusdt_instruments();
    let mut orchestrator = Orchestrator::new(Arc::new(risk), instruments.clone());

    let logic = ArbitrageLogic::new(ArbitrageParams {
        primary_venue: "binance".into(),
        secondary_venue: "hyper".into(),
        min_spread_bps: 50.0,
    });
    let runner = StrategyRunner::new("arb-1", "BTCUSDT", Box::new(logic));
    let policy = IntentPolicy {
        mode: IntentMode::MakerPreferred,
        notional_usd: 1_000.0,
        limit_offset_bps: 0.0,
        min_edge_bps: 0.0,
        post_only: true,
        tif: Tif::Gtc,
        cooldown_ms: 0,
        dedupe_window_ms: 0,
        account: "acct".into(),
    };
    orchestrator.add_strategy(StrategySlot::new(runner, policy, "binance", StrategyMode::Live));

    let ctx = PermissiveCtx;
    let now = Utc::now();

    let first = orchestrator.on_tick(&tick("binance", 0, 100.0, 100.2), &ctx, now);
    assert!(first.approved.is_empty());

    let second = orchestrator.on_tick(&tick("hyper", 1, 99.7, 99.9), &ctx, now);
    assert!(second.approved.is_empty());

    let third = orchestrator.on_tick(&tick("hyper", 2, 101.6, 101.8), &ctx, now);
    assert_eq!(third.approved.len(), 1);

    let routed = &third.approved[0];
    assert_eq!(routed.venue, "binance");
    let order = &routed.approved.order;
    assert_eq!(order.side, Side::Buy);
    assert_eq!(order.meta.liquidity, Some(Liquidity::Maker));
    assert_eq!(order.meta.expected_fee_bps, Some(8.0));
    let fill_px = order.px.expect("maker-preferred orders carry a limit price");
    assert!((fill_px - 101.7).abs() < 1e-9);

    let fee = fill_px * order.qty * 8.0 / 10_000.0;
    let fill = Fill {
        id: Uuid::new_v4(),
        order_id: order.id,
        t: now,
        symbol: "BTCUSDT".into(),
        px: fill_px,
        qty: order.qty,
        side: Side::Buy,
        fee: Some(fee),
        liquidity: Some(Liquidity::Maker),
    };

    let adjustments = adjustments_for_fill(&fill, "binance", &instruments);
    assert_eq!(adjustments.len(), 2);

    // The same adjustments the runtime publishes on the bus must also be folded into the
    // live AccountState it reads available balances from (§4.10).
    let account = AccountState::new();
    account.seed_demo_balance("binance", "USDT", 10_000.0);
    for adjustment in &adjustments {
        account.apply(adjustment);
    }
    let usdt = account.balance("binance", "USDT");
    assert!((usdt.total - (10_000.0 - fill_px * order.qty - fee)).abs() < 1e-9);
    assert_eq!(account.balance("binance", "BTC").total, order.qty);

    let mut portfolio = PortfolioProjection::new(10_000.0, 0);
    portfolio.update_mark("BTCUSDT", fill.px);
    portfolio.apply_fill(&fill);

    let snapshot = portfolio.snapshot(now);
    assert_eq!(snapshot.positions.len(), 1);
    assert!((snapshot.positions[0].pos - order.qty).abs() < 1e-9);
    assert!((snapshot.positions[0].avg_px - fill_px).abs() < 1e-9);

    let analytics = portfolio.analytics(now);
    assert!((analytics.fees_paid - fee).abs() < 1e-9);
    assert!(analytics.fees_paid > 0.0);
}

fn sorted(mut snapshot: PortfolioSnapshot) -> PortfolioSnapshot {
    snapshot.positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    snapshot
}

/// Replaying the full event log of a randomized session into a fresh projection reproduces the
/// live projection's final snapshot exactly.
#[test]
fn replay_reproduces_a_randomized_sessions_live_snapshot() {
    const EVENT_COUNT: usize = 5_000;
    const SYMBOLS: [&str; 2] = ["BTCUSDT", "ETHUSDT"];

    let mut rng = StdRng::seed_from_u64(7);
    let mut live = PortfolioProjection::new(100_000.0, 0);
    let mut log: Vec<DomainEvent> = Vec::with_capacity(EVENT_COUNT);
    let mut marks: HashMap<&str, f64> = HashMap::from([("BTCUSDT", 100.0), ("ETHUSDT", 20.0)]);
    let base_t = Utc::now();

    for i in 0..EVENT_COUNT {
        let t = base_t + Duration::milliseconds(i as i64);
        let symbol = SYMBOLS[rng.random_range(0..SYMBOLS.len())];
        let mark = marks.get_mut(symbol).unwrap();

        if rng.random_bool(0.7) {
            let drift = rng.random_range(-0.5..0.5);
            *mark = (*mark + drift).max(0.01);
            let spread = *mark * 0.0005;
            let market_tick = Tick {
                t: t.timestamp_millis(),
                symbol: symbol.to_string(),
                bid: Some(*mark - spread),
                ask: Some(*mark + spread),
                last: None,
                venue: "binance".into(),
            };
            live.update_mark(symbol, market_tick.mark().unwrap());
            log.push(DomainEvent::new(EventPayload::MarketTick(market_tick), t));
        } else {
            let side = if rng.random_bool(0.5) { Side::Buy } else { Side::Sell };
            let qty = rng.random_range(0.01..2.0);
            let px = *mark;
            let fee = px * qty * 0.0008;
            let fill = Fill {
                id: Uuid::new_v4(),
                order_id: Uuid::new_v4(),
                t,
                symbol: symbol.to_string(),
                px,
                qty,
                side,
                fee: Some(fee),
                liquidity: Some(Liquidity::Taker),
            };
            live.apply_fill(&fill);
            log.push(DomainEvent::new(EventPayload::OrderFill(fill), t));
        }
    }

    assert_eq!(log.len(), EVENT_COUNT);

    let final_t = base_t + Duration::milliseconds(EVENT_COUNT as i64);
    let replayed = PortfolioProjection::replay(&log, 100_000.0, 0);

    assert_eq!(sorted(live.snapshot(final_t)).positions, sorted(replayed.snapshot(final_t)).positions);
    assert!((live.snapshot(final_t).cash - replayed.snapshot(final_t).cash).abs() < 1e-6);
    assert!((live.snapshot(final_t).nav - replayed.snapshot(final_t).nav).abs() < 1e-6);
    assert!((live.snapshot(final_t).realized - replayed.snapshot(final_t).realized).abs() < 1e-6);
}
