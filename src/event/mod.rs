use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::BalanceEntry;
use crate::execution::adapter::{OrderAck, OrderReject};
use crate::market::Tick;
use crate::portfolio::{PortfolioAnalytics, PortfolioSnapshot};
use crate::risk::RiskCheckOutcome;
use crate::strategy::intent::OrderIntent;
use crate::strategy::signal::Signal;

pub mod bus;
pub mod ring_buffer;
pub mod store;

/// Fill a strategy/venue reports back for an [`OrderIntent`] (§3 `Fill`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub id: Uuid,
    pub order_id: Uuid,
    pub t: DateTime<Utc>,
    pub symbol: String,
    pub px: f64,
    pub qty: f64,
    pub side: crate::strategy::intent::Side,
    pub fee: Option<f64>,
    pub liquidity: Option<crate::strategy::intent::Liquidity>,
}

/// An order cancel acknowledgement/confirmation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCancel {
    pub id: Uuid,
    pub t: DateTime<Utc>,
}

/// A transfer between venues/assets outside of fill accounting (deposits, withdrawals,
/// manual adjustments). Feeds [`crate::account::state::AccountState`] alongside
/// `account.balance.adjusted`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountTransfer {
    pub venue: String,
    pub asset: String,
    pub delta: f64,
    pub reason: String,
    pub t: DateTime<Utc>,
}

/// A single balance-ledger mutation, produced by [`crate::account::fill_accounting`] or by an
/// external transfer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceAdjusted {
    pub venue: String,
    pub asset: String,
    pub delta: f64,
    pub reason: String,
    pub order_id: Option<Uuid>,
    pub t: DateTime<Utc>,
}

/// PnL/analytics snapshot, a richer sibling of [`PortfolioSnapshot`] published less often.
pub type PnlAnalytics = PortfolioAnalytics;

/// Feed health transition, mirrors [`crate::market::feed::FeedStatus`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedStatusEvent {
    pub venue: String,
    pub symbol: String,
    pub status: crate::market::feed::FeedStatus,
    pub t: DateTime<Utc>,
}

/// The closed set of event payloads the runtime ever produces (§3 `DomainEvent`). Unknown
/// types are a hard error at subscription registration (§9) — there is deliberately no
/// catch-all variant here; adding a new kind of event means adding a variant here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "market.tick")]
    MarketTick(Tick),
    #[serde(rename = "strategy.signal")]
    StrategySignal(Signal),
    #[serde(rename = "strategy.intent")]
    StrategyIntent(OrderIntent),
    #[serde(rename = "order.new")]
    OrderNew(OrderIntent),
    #[serde(rename = "order.ack")]
    OrderAck(OrderAck),
    #[serde(rename = "order.fill")]
    OrderFill(Fill),
    #[serde(rename = "order.reject")]
    OrderReject(OrderReject),
    #[serde(rename = "order.cancel")]
    OrderCancel(OrderCancel),
    #[serde(rename = "risk.check")]
    RiskCheck(RiskCheckOutcome),
    #[serde(rename = "account.balance.adjusted")]
    AccountBalanceAdjusted(BalanceAdjusted),
    #[serde(rename = "account.transfer")]
    AccountTransfer(AccountTransfer),
    #[serde(rename = "portfolio.snapshot")]
    PortfolioSnapshot(PortfolioSnapshot),
    #[serde(rename = "pnl.analytics")]
    PnlAnalytics(PnlAnalytics),
    #[serde(rename = "feed.status")]
    FeedStatus(FeedStatusEvent),
}

impl EventPayload {
    /// The topic string used for bus subscription and store filtering, matching the closed
    /// union's type tags in §3.
    pub fn topic(&self) -> &'static str {
        match self {
            EventPayload::MarketTick(_) => "market.tick",
            EventPayload::StrategySignal(_) => "strategy.signal",
            EventPayload::StrategyIntent(_) => "strategy.intent",
            EventPayload::OrderNew(_) => "order.new",
            EventPayload::OrderAck(_) => "order.ack",
            EventPayload::OrderFill(_) => "order.fill",
            EventPayload::OrderReject(_) => "order.reject",
            EventPayload::OrderCancel(_) => "order.cancel",
            EventPayload::RiskCheck(_) => "risk.check",
            EventPayload::AccountBalanceAdjusted(_) => "account.balance.adjusted",
            EventPayload::AccountTransfer(_) => "account.transfer",
            EventPayload::PortfolioSnapshot(_) => "portfolio.snapshot",
            EventPayload::PnlAnalytics(_) => "pnl.analytics",
            EventPayload::FeedStatus(_) => "feed.status",
        }
    }

    /// Critical event types must never be silently dropped by the persistence worker (§4.3).
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            EventPayload::OrderNew(_)
                | EventPayload::OrderFill(_)
                | EventPayload::OrderReject(_)
                | EventPayload::AccountBalanceAdjusted(_)
                | EventPayload::AccountTransfer(_)
                | EventPayload::PortfolioSnapshot(_)
                | EventPayload::PnlAnalytics(_)
                | EventPayload::RiskCheck(_)
        )
    }
}

/// Envelope wrapping an [`EventPayload`] with identity, ordering, and trace metadata (§3
/// `DomainEvent`). `seq` is assigned by the [`store::EventStore`] on append, not by the
/// producer — producers only know emission order, the store assigns total order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub payload: EventPayload,
    pub metadata: Option<serde_json::Value>,
    pub trace_id: Option<Uuid>,
    /// Monotonic sequence assigned by the event store on append. `0` until appended.
    pub seq: u64,
}

impl DomainEvent {
    /// Constructs a fresh, not-yet-appended event (`seq == 0`).
    pub fn new(payload: EventPayload, ts: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts,
            payload,
            metadata: None,
            trace_id: None,
            seq: 0,
        }
    }

    pub fn with_trace(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn topic(&self) -> &'static str {
        self.payload.topic()
    }
}
