use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::strategy::intent::Side;

#[derive(Clone, Debug)]
struct Reservation {
    side: Side,
    account: String,
    asset: String,
    /// Quote-asset notional reserved (BUY) or base-asset quantity reserved (SELL).
    amount: f64,
}

/// Scoped risk reservations keyed by order id (§5 "Risk reservations are held in an
/// in-process map keyed by orderId with scoped release on terminal event"). Reservations are
/// released on reject/cancel, consumed on fill; an ack-timeout does NOT release a reservation
/// until the forced cancel observes a terminal event (§5) — callers enforce that ordering by
/// only calling [`ReservationLedger::release`] from reject/cancel/fill handling, never from
/// the reconciler's timeout tick itself. Each reservation also carries the `(account, asset)`
/// it's denominated in, so a pending reservation on one symbol's asset never shrinks the
/// headroom reported for an unrelated asset (§4.6 step 5).
#[derive(Default)]
pub struct ReservationLedger {
    reserved: Mutex<HashMap<Uuid, Reservation>>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&self, order_id: Uuid, side: Side, account: &str, asset: &str, amount: f64) {
        self.reserved.lock().insert(
            order_id,
            Reservation {
                side,
                account: account.to_string(),
                asset: asset.to_string(),
                amount,
            },
        );
    }

    /// Total quote notional currently reserved by open BUY intents against `(account, asset)`.
    pub fn reserved_quote(&self, account: &str, asset: &str) -> f64 {
        self.reserved
            .lock()
            .values()
            .filter(|r| r.side == Side::Buy && r.account == account && r.asset == asset)
            .map(|r| r.amount)
            .sum()
    }

    /// Total base quantity currently reserved by open SELL intents against `(account, asset)`.
    pub fn reserved_base(&self, account: &str, asset: &str) -> f64 {
        self.reserved
            .lock()
            .values()
            .filter(|r| r.side == Side::Sell && r.account == account && r.asset == asset)
            .map(|r| r.amount)
            .sum()
    }

    /// Released on reject, cancel, or fill — never on a bare ack-timeout tick.
    pub fn release(&self, order_id: Uuid) {
        self.reserved.lock().remove(&order_id);
    }

    pub fn is_reserved(&self, order_id: Uuid) -> bool {
        self.reserved.lock().contains_key(&order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_idempotent_and_scoped_per_order() {
        let ledger = ReservationLedger::new();
        let id = Uuid::new_v4();
        ledger.reserve(id, Side::Buy, "acct", "USDT", 100.0);
        assert_eq!(ledger.reserved_quote("acct", "USDT"), 100.0);

        ledger.release(id);
        assert_eq!(ledger.reserved_quote("acct", "USDT"), 0.0);
        ledger.release(id); // idempotent
        assert!(!ledger.is_reserved(id));
    }

    #[test]
    fn reservations_do_not_leak_across_assets() {
        let ledger = ReservationLedger::new();
        ledger.reserve(Uuid::new_v4(), Side::Buy, "acct", "USDT", 100.0);
        ledger.reserve(Uuid::new_v4(), Side::Buy, "acct", "USDC", 50.0);
        ledger.reserve(Uuid::new_v4(), Side::Sell, "acct", "BTC", 1.0);

        assert_eq!(ledger.reserved_quote("acct", "USDT"), 100.0);
        assert_eq!(ledger.reserved_quote("acct", "USDC"), 50.0);
        assert_eq!(ledger.reserved_base("acct", "BTC"), 1.0);
        assert_eq!(ledger.reserved_base("acct", "USDT"), 0.0);
    }
}
