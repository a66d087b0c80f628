use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Trading-pair tick/lot metadata (C6). A faithful stand-in for the external
/// market-structure-sync collaborator (§1 Non-goals) — this repository only serves lookups,
/// it never refreshes itself from a venue.
#[derive(Clone, Debug, Default)]
pub struct InstrumentRepository {
    pairs: HashMap<String, PairMeta>,
    fee_schedules: Vec<FeeSchedule>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairMeta {
    pub tick_size: f64,
    pub lot_size: f64,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Spot,
    Margin,
    Perpetual,
}

/// §3 `FeeSchedule`. `symbol == None` represents the `"*"` wildcard row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub venue: String,
    pub symbol: Option<String>,
    pub product_type: ProductType,
    pub maker_bps: f64,
    pub taker_bps: f64,
    pub effective_from: DateTime<Utc>,
    pub source: String,
}

impl InstrumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pair(&mut self, symbol: impl Into<String>, meta: PairMeta) {
        self.pairs.insert(symbol.into(), meta);
    }

    pub fn register_fee_schedule(&mut self, schedule: FeeSchedule) {
        self.fee_schedules.push(schedule);
    }

    pub fn pair(&self, symbol: &str) -> Option<PairMeta> {
        self.pairs.get(symbol).cloned()
    }

    /// Fee lookup: specific `(venue, symbol)` row wins; falls back to that venue's `"*"`
    /// wildcard row (§3 "Lookup falls back from specific symbol to wildcard").
    pub fn fee_schedule(&self, venue: &str, symbol: &str) -> Option<&FeeSchedule> {
        self.fee_schedules
            .iter()
            .filter(|s| s.venue == venue)
            .find(|s| s.symbol.as_deref() == Some(symbol))
            .or_else(|| {
                self.fee_schedules
                    .iter()
                    .filter(|s| s.venue == venue)
                    .find(|s| s.symbol.is_none())
            })
    }

    /// Quantizes `px` to `tick_size`, and `qty` to `lot_size` flooring in both directions per
    /// §4.5 ("floor for buys, floor for sells").
    pub fn quantize(&self, symbol: &str, px: f64, qty: f64) -> Option<(f64, f64)> {
        let meta = self.pair(symbol)?;
        let q_px = (px / meta.tick_size).floor() * meta.tick_size;
        let q_qty = (qty / meta.lot_size).floor() * meta.lot_size;
        Some((q_px, q_qty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(venue: &str, symbol: Option<&str>, maker: f64, taker: f64) -> FeeSchedule {
        FeeSchedule {
            venue: venue.into(),
            symbol: symbol.map(String::from),
            product_type: ProductType::Spot,
            maker_bps: maker,
            taker_bps: taker,
            effective_from: Utc::now(),
            source: "test".into(),
        }
    }

    #[test]
    fn fee_lookup_prefers_specific_symbol_over_wildcard() {
        let mut repo = InstrumentRepository::new();
        repo.register_fee_schedule(schedule("binance", None, 10.0, 15.0));
        repo.register_fee_schedule(schedule("binance", Some("BTCUSDT"), 8.0, 12.0));

        let found = repo.fee_schedule("binance", "BTCUSDT").unwrap();
        assert_eq!(found.maker_bps, 8.0);

        let fallback = repo.fee_schedule("binance", "ETHUSDT").unwrap();
        assert_eq!(fallback.maker_bps, 10.0);
    }

    #[test]
    fn quantize_floors_price_and_quantity() {
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

        let (px, qty) = repo.quantize("BTCUSDT", 101.76, 0.0019).unwrap();
        assert!((px - 101.7).abs() < 1e-9);
        assert!((qty - 0.001).abs() < 1e-9);
    }
}
