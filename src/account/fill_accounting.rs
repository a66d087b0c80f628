use crate::event::{BalanceAdjusted, DomainEvent, Fill};
use crate::market::instrument::InstrumentRepository;
use crate::strategy::intent::Side;

/// Turns a [`Fill`] into the two `account.balance.adjusted` events that feed
/// [`crate::account::state::AccountState`] (C16, §4.10): base delta `±qty`, quote delta
/// `∓(qty·px + fee)`. Requires the pair's base/quote assets to be known; fills for unregistered
/// symbols are skipped rather than guessed.
pub fn adjustments_for_fill(
    fill: &Fill,
    venue: &str,
    instruments: &InstrumentRepository,
) -> Vec<DomainEvent> {
    let Some(pair) = instruments.pair(&fill.symbol) else {
        return Vec::new();
    };
    if fill.px <= 0.0 {
        return Vec::new();
    }

    let fee = fill.fee.unwrap_or(0.0);
    let sign = fill.side.sign();
    let base_delta = sign * fill.qty;
    let quote_delta = -sign * (fill.qty * fill.px) - fee;

    let base = BalanceAdjusted {
        venue: venue.into(),
        asset: pair.base_asset,
        delta: base_delta,
        reason: "fill".into(),
        order_id: Some(fill.order_id),
        t: fill.t,
    };
    let quote = BalanceAdjusted {
        venue: venue.into(),
        asset: pair.quote_asset,
        delta: quote_delta,
        reason: "fill".into(),
        order_id: Some(fill.order_id),
        t: fill.t,
    };

    vec![
        DomainEvent::new(crate::event::EventPayload::AccountBalanceAdjusted(base), fill.t),
        DomainEvent::new(crate::event::EventPayload::AccountBalanceAdjusted(quote), fill.t),
    ]
}
