use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{DomainEvent, EventPayload, Fill};
use crate::portfolio::PortfolioSnapshot;

/// One symbol's open position (§4.11).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub pos: f64,
    pub avg_px: f64,
    pub realized: f64,
}

/// `PortfolioSnapshot` plus peak/drawdown, published less often than the raw snapshot (§4.11).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAnalytics {
    pub snapshot: PortfolioSnapshot,
    pub peak_nav: f64,
    pub drawdown: f64,
    pub drawdown_pct: f64,
    pub fees_paid: f64,
}

struct Position {
    pos: f64,
    avg_px: f64,
    realized: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            pos: 0.0,
            avg_px: 0.0,
            realized: 0.0,
        }
    }
}

/// Folds fills and cash adjustments against a live mark stream into position/cash/NAV
/// snapshots (C17, §4.11). Not thread-shared: the runtime owns a single instance on the hot
/// path, matching the single-writer-per-instance model of §5.
pub struct PortfolioProjection {
    positions: HashMap<String, Position>,
    marks: HashMap<String, f64>,
    cash: f64,
    realized_total: f64,
    fees_paid: f64,
    peak_nav: f64,
    last_emit: Option<DateTime<Utc>>,
    persist_throttle_ms: i64,
}

impl PortfolioProjection {
    pub fn new(starting_cash: f64, persist_throttle_ms: i64) -> Self {
        Self {
            positions: HashMap::new(),
            marks: HashMap::new(),
            cash: starting_cash,
            realized_total: 0.0,
            fees_paid: 0.0,
            peak_nav: starting_cash,
            last_emit: None,
            persist_throttle_ms,
        }
    }

    pub fn update_mark(&mut self, symbol: &str, px: f64) {
        self.marks.insert(symbol.to_string(), px);
    }

    /// Folds a fill into position/cash state (§4.11's avg-price and realized-P&L rules).
    pub fn apply_fill(&mut self, fill: &Fill) {
        let signed_qty = fill.side.sign() * fill.qty;
        let fee = fill.fee.unwrap_or(0.0);
        self.fees_paid += fee;
        self.cash += -signed_qty * fill.px - fee;
        self.marks.insert(fill.symbol.clone(), fill.px);

        let entry = self.positions.entry(fill.symbol.clone()).or_default();
        let prev_pos = entry.pos;
        let new_pos = prev_pos + signed_qty;

        if prev_pos == 0.0 || prev_pos.signum() == signed_qty.signum() {
            // Opening or adding in the same direction: weighted-average the price.
            let total_qty = prev_pos.abs() + signed_qty.abs();
            entry.avg_px = if total_qty > 0.0 {
                (entry.avg_px * prev_pos.abs() + fill.px * signed_qty.abs()) / total_qty
            } else {
                fill.px
            };
            entry.pos = new_pos;
        } else {
            // Reducing or flipping: realize the closed portion first.
            let closing_qty = signed_qty.abs().min(prev_pos.abs());
            let realized = closing_qty * (fill.px - entry.avg_px) * prev_pos.signum();
            entry.realized += realized;
            self.realized_total += realized;

            if new_pos.signum() != prev_pos.signum() && new_pos != 0.0 {
                // Flipped sign: the residual beyond flat opens a fresh position at this price.
                entry.avg_px = fill.px;
            }
            entry.pos = new_pos;
        }
    }

    pub fn apply_cash_adjustment(&mut self, delta: f64) {
        self.cash += delta;
    }

    pub fn nav(&self) -> f64 {
        self.nav_with_marks()
    }

    fn nav_with_marks(&self) -> f64 {
        self.cash
            + self
                .positions
                .iter()
                .map(|(symbol, p)| p.pos * self.marks.get(symbol).copied().unwrap_or(p.avg_px))
                .sum::<f64>()
    }

    fn unrealized(&self) -> f64 {
        self.positions
            .iter()
            .map(|(symbol, p)| {
                let mark = self.marks.get(symbol).copied().unwrap_or(p.avg_px);
                (mark - p.avg_px) * p.pos
            })
            .sum()
    }

    /// Builds the current snapshot unconditionally (bypassing the throttle), used for replay
    /// consistency checks.
    pub fn snapshot(&self, t: DateTime<Utc>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            t,
            positions: self
                .positions
                .iter()
                .map(|(symbol, p)| PositionSnapshot {
                    symbol: symbol.clone(),
                    pos: p.pos,
                    avg_px: p.avg_px,
                    realized: p.realized,
                })
                .collect(),
            cash: self.cash,
            nav: self.nav_with_marks(),
            realized: self.realized_total,
            unrealized: self.unrealized(),
        }
    }

    pub fn analytics(&self, t: DateTime<Utc>) -> PortfolioAnalytics {
        let snapshot = self.snapshot(t);
        let nav = snapshot.nav;
        let peak_nav = self.peak_nav.max(nav);
        let drawdown = peak_nav - nav;
        let drawdown_pct = if peak_nav > 0.0 {
            drawdown / peak_nav
        } else {
            0.0
        };
        PortfolioAnalytics {
            snapshot,
            peak_nav,
            drawdown,
            drawdown_pct,
            fees_paid: self.fees_paid,
        }
    }

    /// Advances `peak_nav` and returns `Some(snapshot)` only if `persistThrottleMs` has
    /// elapsed since the last emission (§4.11's throttled emitter).
    pub fn maybe_emit(&mut self, t: DateTime<Utc>) -> Option<PortfolioSnapshot> {
        let nav = self.nav_with_marks();
        if nav > self.peak_nav {
            self.peak_nav = nav;
        }

        let should_emit = match self.last_emit {
            None => true,
            Some(last) => (t - last).num_milliseconds() >= self.persist_throttle_ms,
        };
        if !should_emit {
            return None;
        }
        self.last_emit = Some(t);
        Some(self.snapshot(t))
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.pos).unwrap_or(0.0)
    }

    pub fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    /// Replays a full event log into a fresh projection (§8 "replaying the full event log
    /// into fresh projections yields byte-identical snapshots").
    pub fn replay(events: &[DomainEvent], starting_cash: f64, persist_throttle_ms: i64) -> Self {
        let mut projection = Self::new(starting_cash, persist_throttle_ms);
        for event in events {
            match &event.payload {
                EventPayload::OrderFill(fill) => projection.apply_fill(fill),
                EventPayload::MarketTick(tick) => {
                    if let Some(mark) = tick.mark() {
                        projection.update_mark(&tick.symbol, mark);
                    }
                }
                _ => {}
            }
        }
        projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::intent::{Liquidity, Side};
    use uuid::Uuid;

    fn fill(symbol: &str, side: Side, qty: f64, px: f64, fee: f64) -> Fill {
        Fill {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            t: Utc::now(),
            symbol: symbol.into(),
            px,
            qty,
            side,
            fee: Some(fee),
            liquidity: Some(Liquidity::Taker),
        }
    }

    #[test]
    fn opening_and_adding_weights_the_average_price() {
        let mut projection = PortfolioProjection::new(10_000.0, 250);
        projection.apply_fill(&fill("BTCUSDT", Side::Buy, 1.0, 100.0, 0.0));
        projection.apply_fill(&fill("BTCUSDT", Side::Buy, 1.0, 110.0, 0.0));

        assert_eq!(projection.position("BTCUSDT"), 2.0);
        assert!((projection.positions.get("BTCUSDT").unwrap().avg_px - 105.0).abs() < 1e-9);
    }

    #[test]
    fn reducing_realizes_pnl_on_the_closed_portion() {
        let mut projection = PortfolioProjection::new(10_000.0, 250);
        projection.apply_fill(&fill("BTCUSDT", Side::Buy, 2.0, 100.0, 0.0));
        projection.apply_fill(&fill("BTCUSDT", Side::Sell, 1.0, 120.0, 0.0));

        assert_eq!(projection.position("BTCUSDT"), 1.0);
        assert!((projection.realized_total - 20.0).abs() < 1e-9);
    }

    #[test]
    fn flipping_sign_realizes_the_close_then_reopens_at_fill_price() {
        let mut projection = PortfolioProjection::new(10_000.0, 250);
        projection.apply_fill(&fill("BTCUSDT", Side::Buy, 1.0, 100.0, 0.0));
        projection.apply_fill(&fill("BTCUSDT", Side::Sell, 2.0, 90.0, 0.0));

        assert_eq!(projection.position("BTCUSDT"), -1.0);
        assert!((projection.positions.get("BTCUSDT").unwrap().avg_px - 90.0).abs() < 1e-9);
        assert!((projection.realized_total - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn drawdown_tracks_peak_nav_and_never_goes_negative_when_flat() {
        let mut projection = PortfolioProjection::new(1_000.0, 250);
        projection.update_mark("BTCUSDT", 100.0);
        let t0 = Utc::now();
        projection.maybe_emit(t0);

        projection.apply_fill(&fill("BTCUSDT", Side::Buy, 1.0, 100.0, 1.0));
        projection.update_mark("BTCUSDT", 90.0);
        let analytics = projection.analytics(t0 + chrono::Duration::milliseconds(300));

        assert!(analytics.peak_nav >= analytics.snapshot.nav);
        assert!(analytics.drawdown >= 0.0);
    }

    #[test]
    fn throttled_emitter_suppresses_emissions_inside_the_window() {
        let mut projection = PortfolioProjection::new(1_000.0, 250);
        let t0 = Utc::now();
        assert!(projection.maybe_emit(t0).is_some());
        assert!(projection.maybe_emit(t0 + chrono::Duration::milliseconds(100)).is_none());
        assert!(projection.maybe_emit(t0 + chrono::Duration::milliseconds(300)).is_some());
    }
}
