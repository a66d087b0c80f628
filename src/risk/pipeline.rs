use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::market::instrument::InstrumentRepository;
use crate::risk::reservation::ReservationLedger;
use crate::risk::{RiskCheckOutcome, RiskConfig};
use crate::strategy::intent::{OrderIntent, Side};

/// Narrow read interface the risk pipeline needs from account/portfolio state, so it never
/// holds a direct reference to either component (§9).
pub trait RiskContext {
    fn position(&self, symbol: &str) -> f64;
    fn mark_price(&self, symbol: &str) -> Option<f64>;
    fn available_quote(&self, account: &str, quote_asset: &str) -> f64;
    fn available_base(&self, account: &str, base_asset: &str) -> f64;
    fn committed_margin(&self, account: &str) -> f64;
}

pub struct ApprovedIntent {
    pub order: OrderIntent,
    pub notional: f64,
    pub ref_px: f64,
}

pub struct RejectedIntent {
    pub order: OrderIntent,
    pub reasons: Vec<String>,
}

struct ThrottleWindow {
    timestamps: Vec<DateTime<Utc>>,
}

/// Sequential pre-trade checks splitting intents into approved/rejected (C10). All six checks
/// in §4.6 are evaluated for every intent (not short-circuited) so a rejection can report
/// every triggered reason, even though conceptually "the first rejection wins" as the
/// authoritative cause (§4.6 "Ties ... include every triggered reason ... but still reject on
/// the first").
pub struct RiskPipeline {
    base: RiskConfig,
    overrides: HashMap<String, RiskConfig>,
    throttle_state: Mutex<HashMap<String, ThrottleWindow>>,
    reservations: ReservationLedger,
}

impl RiskPipeline {
    pub fn new(base: RiskConfig) -> Self {
        Self {
            base,
            overrides: HashMap::new(),
            throttle_state: Mutex::new(HashMap::new()),
            reservations: ReservationLedger::new(),
        }
    }

    pub fn with_strategy_override(mut self, strategy_id: impl Into<String>, config: RiskConfig) -> Self {
        self.overrides.insert(strategy_id.into(), config);
        self
    }

    pub fn reservations(&self) -> &ReservationLedger {
        &self.reservations
    }

    fn config_for(&self, strategy_id: Option<&str>) -> &RiskConfig {
        strategy_id
            .and_then(|id| self.overrides.get(id))
            .unwrap_or(&self.base)
    }

    /// Runs all pre-trade checks against `order`, returning the approved or rejected outcome
    /// plus the `risk.check` telemetry event to publish on the bus.
    pub fn evaluate(
        &self,
        order: OrderIntent,
        instruments: &InstrumentRepository,
        ctx: &dyn RiskContext,
        now: DateTime<Utc>,
    ) -> (Result<ApprovedIntent, RejectedIntent>, RiskCheckOutcome) {
        let strategy_id = order.meta.strategy_id.as_deref();
        let config = self.config_for(strategy_id);
        let mut reasons = Vec::new();

        let ref_px = order
            .px
            .or_else(|| ctx.mark_price(&order.symbol))
            .unwrap_or(0.0);

        // 1. Price band.
        if let Some(band) = config.price_bands.get(&order.symbol) {
            if ref_px < band.min || ref_px > band.max {
                reasons.push("price-band".to_string());
            }
        }

        // 2. Notional cap.
        let notional = (order.qty * ref_px).abs();
        if notional > config.notional {
            reasons.push("notional-cap".to_string());
        }

        // 3. Position cap.
        let current_pos = ctx.position(&order.symbol);
        let resulting_pos = current_pos + order.side.sign() * order.qty;
        if resulting_pos.abs() > config.max_position {
            reasons.push("position-cap".to_string());
        }

        // 4. Throttle.
        let throttle_key = strategy_id.unwrap_or("").to_string();
        let throttled = {
            let mut state = self.throttle_state.lock();
            let window = state
                .entry(throttle_key)
                .or_insert_with(|| ThrottleWindow { timestamps: Vec::new() });
            let cutoff = now - chrono::Duration::milliseconds(config.throttle.window_ms);
            window.timestamps.retain(|t| *t > cutoff);
            window.timestamps.len() as u32 >= config.throttle.max_count
        };
        if throttled {
            reasons.push("throttle".to_string());
        }

        // 5. Quote/base reservation guard (cash spot).
        let pair = instruments.pair(&order.symbol);
        if let Some(pair) = &pair {
            match order.side {
                Side::Buy => {
                    let available = ctx.available_quote(&order.account, &pair.quote_asset)
                        - self.reservations.reserved_quote(&order.account, &pair.quote_asset);
                    if notional > available {
                        reasons.push("insufficient-quote".to_string());
                    }
                }
                Side::Sell => {
                    let available = ctx.available_base(&order.account, &pair.base_asset)
                        - self.reservations.reserved_base(&order.account, &pair.base_asset);
                    if order.qty > available {
                        reasons.push("insufficient-base".to_string());
                    }
                }
            }
        }

        // 6. Margin/leverage guard (margin/perp).
        if let Some(margin) = config.margin {
            let committed = ctx.committed_margin(&order.account);
            if committed + notional > margin.collateral * margin.leverage_cap {
                reasons.push("margin-cap".to_string());
            }
        }

        // Record the throttle timestamp once the intent is actually evaluated, regardless of
        // outcome, matching "rolling windowMs per strategy" semantics (attempted, not just
        // approved, intents count against the window).
        {
            let mut state = self.throttle_state.lock();
            if let Some(window) = state.get_mut(&strategy_id.unwrap_or("").to_string()) {
                window.timestamps.push(now);
            }
        }

        let passed = reasons.is_empty();
        let outcome = RiskCheckOutcome {
            order_id: order.id,
            passed,
            reasons: reasons.clone(),
        };

        if passed {
            if order.side == Side::Buy {
                let asset = pair
                    .as_ref()
                    .map(|p| p.quote_asset.clone())
                    .unwrap_or_else(|| order.symbol.clone());
                self.reservations
                    .reserve(order.id, Side::Buy, &order.account, &asset, notional);
            } else {
                let asset = pair
                    .as_ref()
                    .map(|p| p.base_asset.clone())
                    .unwrap_or_else(|| order.symbol.clone());
                self.reservations
                    .reserve(order.id, Side::Sell, &order.account, &asset, order.qty);
            }
            (
                Ok(ApprovedIntent {
                    order,
                    notional,
                    ref_px,
                }),
                outcome,
            )
        } else {
            (Err(RejectedIntent { order, reasons }), outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::instrument::PairMeta;
    use crate::strategy::intent::{IntentMeta, OrderType, Tif};
    use uuid::Uuid;

    struct FakeCtx {
        position: f64,
        mark: f64,
        quote: f64,
        base: f64,
        margin: f64,
    }

    impl RiskContext for FakeCtx {
        fn position(&self, _symbol: &str) -> f64 {
            self.position
        }
        fn mark_price(&self, _symbol: &str) -> Option<f64> {
            Some(self.mark)
        }
        fn available_quote(&self, _account: &str, _asset: &str) -> f64 {
            self.quote
        }
        fn available_base(&self, _account: &str, _asset: &str) -> f64 {
            self.base
        }
        fn committed_margin(&self, _account: &str) -> f64 {
            self.margin
        }
    }

    fn instruments() -> InstrumentRepository {
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
        repo
    }

    fn intent(px: f64, qty: f64) -> OrderIntent {
        OrderIntent {
            id: Uuid::new_v4(),
            t: Utc::now(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            qty,
            order_type: OrderType::Lmt,
            tif: Tif::Ioc,
            account: "acct".into(),
            px: Some(px),
            meta: IntentMeta {
                strategy_id: Some("s1".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn rejects_outside_price_band() {
        let mut config = RiskConfig {
            notional: 1_000_000.0,
            max_position: 1_000.0,
            price_bands: HashMap::new(),
            throttle: crate::risk::Throttle {
                window_ms: 1_000,
                max_count: 100,
            },
            margin: None,
        };
        config.price_bands.insert(
            "BTCUSDT".into(),
            crate::risk::PriceBand {
                min: 1_000.0,
                max: 100_000.0,
            },
        );
        let pipeline = RiskPipeline::new(config);
        let ctx = FakeCtx {
            position: 0.0,
            mark: 500.0,
            quote: 1_000_000.0,
            base: 1_000.0,
            margin: 0.0,
        };

        let (outcome, check) = pipeline.evaluate(intent(500.0, 1.0), &instruments(), &ctx, Utc::now());
        assert!(outcome.is_err());
        assert!(!check.passed);
        assert!(check.reasons.iter().any(|r| r == "price-band"));
    }

    #[test]
    fn approves_and_reserves_quote_on_success() {
        let config = RiskConfig {
            notional: 1_000_000.0,
            max_position: 1_000.0,
            price_bands: HashMap::new(),
            throttle: crate::risk::Throttle {
                window_ms: 1_000,
                max_count: 100,
            },
            margin: None,
        };
        let pipeline = RiskPipeline::new(config);
        let ctx = FakeCtx {
            position: 0.0,
            mark: 100.0,
            quote: 1_000.0,
            base: 10.0,
            margin: 0.0,
        };

        let (outcome, check) = pipeline.evaluate(intent(100.0, 1.0), &instruments(), &ctx, Utc::now());
        assert!(outcome.is_ok());
        assert!(check.passed);
        assert_eq!(pipeline.reservations().reserved_quote("acct", "USDT"), 100.0);
    }

    #[test]
    fn reservation_on_one_asset_does_not_shrink_headroom_for_another() {
        let mut repo = instruments();
        repo.register_pair(
            "ETHBUSD",
            PairMeta {
                tick_size: 0.01,
                lot_size: 0.01,
                base_asset: "ETH".into(),
                quote_asset: "BUSD".into(),
            },
        );
        let config = RiskConfig {
            notional: 1_000_000.0,
            max_position: 1_000.0,
            price_bands: HashMap::new(),
            throttle: crate::risk::Throttle {
                window_ms: 1_000,
                max_count: 100,
            },
            margin: None,
        };
        let pipeline = RiskPipeline::new(config);
        let ctx = FakeCtx {
            position: 0.0,
            mark: 100.0,
            quote: 150.0,
            base: 10.0,
            margin: 0.0,
        };

        let (btc, _) = pipeline.evaluate(intent(100.0, 1.0), &repo, &ctx, Utc::now());
        assert!(btc.is_ok());

        let mut eth_intent = intent(100.0, 1.0);
        eth_intent.symbol = "ETHBUSD".into();
        let (eth, check) = pipeline.evaluate(eth_intent, &repo, &ctx, Utc::now());
        assert!(eth.is_ok(), "BUSD headroom must not be reduced by a USDT reservation");
        assert!(check.passed);
    }

    #[test]
    fn throttle_rejects_once_window_is_full() {
        let config = RiskConfig {
            notional: 1_000_000.0,
            max_position: 1_000.0,
            price_bands: HashMap::new(),
            throttle: crate::risk::Throttle {
                window_ms: 60_000,
                max_count: 1,
            },
            margin: None,
        };
        let pipeline = RiskPipeline::new(config);
        let ctx = FakeCtx {
            position: 0.0,
            mark: 100.0,
            quote: 1_000_000.0,
            base: 1_000.0,
            margin: 0.0,
        };

        let now = Utc::now();
        let (first, _) = pipeline.evaluate(intent(100.0, 0.1), &instruments(), &ctx, now);
        assert!(first.is_ok());

        let (second, check) = pipeline.evaluate(intent(100.0, 0.1), &instruments(), &ctx, now);
        assert!(second.is_err());
        assert!(check.reasons.iter().any(|r| r == "throttle"));
    }
}
