use serde::{Deserialize, Serialize};

pub mod feed;
pub mod instrument;

/// A single market-data update (§3 `Tick`). At least one of `bid`/`ask`/`last` is present;
/// `t` is monotonic per `(venue, symbol)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Epoch milliseconds.
    pub t: i64,
    pub symbol: String,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub venue: String,
}

impl Tick {
    /// The reference "mark" price used for P&L and risk checks: mid if both sides are
    /// present, otherwise whichever side (or last trade) is available.
    pub fn mark(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => self.last,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bid.is_some() || self.ask.is_some() || self.last.is_some()
    }
}
