use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::store::{replay_then_follow, EventStore};
use crate::event::{DomainEvent, EventPayload};

/// One asset's balance on one venue (§3 `BalanceEntry`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub total: f64,
    pub available: f64,
}

/// Projection over `account.balance.adjusted` and `account.transfer` events (C15): `{venue →
/// asset → BalanceEntry}`, rebuilt by reading the store then subscribing under the same
/// cursor (§4.2, §4.10).
pub struct AccountState {
    balances: RwLock<HashMap<(String, String), BalanceEntry>>,
}

impl AccountState {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Replays the full backlog from `store` and returns the state plus the live subscription
    /// to keep folding new events with [`AccountState::apply`].
    pub fn rebuild(store: &dyn EventStore) -> (Self, tokio::sync::broadcast::Receiver<DomainEvent>) {
        let state = Self::new();
        let (backlog, rx) = replay_then_follow(store, None);
        for event in backlog {
            state.apply(&event);
        }
        (state, rx)
    }

    pub fn apply(&self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::AccountBalanceAdjusted(adjusted) => {
                let mut balances = self.balances.write();
                let entry = balances
                    .entry((adjusted.venue.clone(), adjusted.asset.clone()))
                    .or_default();
                entry.total += adjusted.delta;
                entry.available += adjusted.delta;
            }
            EventPayload::AccountTransfer(transfer) => {
                let mut balances = self.balances.write();
                let entry = balances
                    .entry((transfer.venue.clone(), transfer.asset.clone()))
                    .or_default();
                entry.total += transfer.delta;
                entry.available += transfer.delta;
            }
            _ => {}
        }
    }

    pub fn balance(&self, venue: &str, asset: &str) -> BalanceEntry {
        self.balances
            .read()
            .get(&(venue.to_string(), asset.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn all_balances(&self) -> HashMap<(String, String), BalanceEntry> {
        self.balances.read().clone()
    }

    /// Seeds a demo balance for `(venue, asset)` unless a non-zero balance already exists
    /// (§9 open question: the source checks `existing.total > 0` and skips rather than
    /// topping up).
    pub fn seed_demo_balance(&self, venue: &str, asset: &str, amount: f64) {
        let mut balances = self.balances.write();
        let entry = balances
            .entry((venue.to_string(), asset.to_string()))
            .or_default();
        if entry.total > 0.0 {
            return;
        }
        entry.total = amount;
        entry.available = amount;
    }
}

impl Default for AccountState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BalanceAdjusted;
    use chrono::Utc;

    fn adjusted_event(venue: &str, asset: &str, delta: f64) -> DomainEvent {
        DomainEvent::new(
            EventPayload::AccountBalanceAdjusted(BalanceAdjusted {
                venue: venue.into(),
                asset: asset.into(),
                delta,
                reason: "fill".into(),
                order_id: None,
                t: Utc::now(),
            }),
            Utc::now(),
        )
    }

    #[test]
    fn folds_balance_adjustments_per_venue_asset() {
        let state = AccountState::new();
        state.apply(&adjusted_event("binance", "USDT", 1_000.0));
        state.apply(&adjusted_event("binance", "USDT", -100.0));
        state.apply(&adjusted_event("binance", "BTC", 1.0));

        assert_eq!(state.balance("binance", "USDT").total, 900.0);
        assert_eq!(state.balance("binance", "BTC").total, 1.0);
    }

    #[test]
    fn seed_demo_balance_skips_when_already_funded() {
        let state = AccountState::new();
        state.apply(&adjusted_event("binance", "USDT", 50.0));
        state.seed_demo_balance("binance", "USDT", 10_000.0);
        assert_eq!(state.balance("binance", "USDT").total, 50.0);

        state.seed_demo_balance("binance", "BTC", 1.0);
        assert_eq!(state.balance("binance", "BTC").total, 1.0);
    }
}
