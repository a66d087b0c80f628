use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{Fill, OrderCancel};
use crate::execution::ExecutionError;
use crate::market::instrument::InstrumentRepository;
use crate::strategy::intent::{Liquidity, OrderIntent, Side};

/// An order acknowledgement from the venue (§3 `OrderAck`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: Uuid,
    pub venue_order_id: Option<String>,
    pub t: DateTime<Utc>,
}

/// A rejection from the venue, as opposed to a pre-trade risk rejection (§3 `OrderReject`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderReject {
    pub order_id: Uuid,
    pub reason: String,
    pub t: DateTime<Utc>,
}

/// Lifecycle event emitted on [`ExecutionAdapter::events`] (§6 "venue adapter interface").
#[derive(Clone, Debug, PartialEq)]
pub enum AdapterEvent {
    Ack(OrderAck),
    Fill(Fill),
    Reject(OrderReject),
    Cancel(OrderCancel),
}

/// Submit/cancel contract every execution venue (paper or live) implements (§4.8, §6).
/// Submission must be idempotent: resubmitting the same `order.id` yields at most one ack
/// (§8 "Idempotent submit").
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    fn id(&self) -> &str;
    async fn submit(&self, order: &OrderIntent) -> Result<(), ExecutionError>;
    async fn cancel(&self, order_id: Uuid) -> Result<(), ExecutionError>;
    fn events(&self) -> mpsc::UnboundedReceiver<AdapterEvent>;
}

/// A paper-trading adapter (C13): fills every submitted order immediately at the order's own
/// price (or the last known mark for market orders), deducting a fee from the schedule. Mirrors
/// [`crate::execution::adapter`]'s real-venue contract without any network I/O, the way the
/// teacher's `SimulatedExecution` stands in for a broker.
pub struct PaperAdapter {
    id: String,
    instruments: InstrumentRepository,
    seen: Mutex<HashSet<Uuid>>,
    tx: mpsc::UnboundedSender<AdapterEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<AdapterEvent>>>,
}

impl PaperAdapter {
    pub fn new(id: impl Into<String>, instruments: InstrumentRepository) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.into(),
            instruments,
            seen: Mutex::new(HashSet::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for PaperAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit(&self, order: &OrderIntent) -> Result<(), ExecutionError> {
        if !self.seen.lock().insert(order.id) {
            return Ok(());
        }

        let _ = self.tx.send(AdapterEvent::Ack(OrderAck {
            order_id: order.id,
            venue_order_id: Some(order.id.to_string()),
            t: order.t,
        }));

        let px = match order.px {
            Some(px) => px,
            None => return Ok(()),
        };

        let liquidity = order.meta.liquidity.unwrap_or(Liquidity::Taker);
        let fee_bps = order
            .meta
            .expected_fee_bps
            .or_else(|| {
                self.instruments
                    .fee_schedule(&self.id, &order.symbol)
                    .map(|s| match liquidity {
                        Liquidity::Maker => s.maker_bps,
                        Liquidity::Taker => s.taker_bps,
                    })
            })
            .unwrap_or(0.0);
        let notional = order.qty * px;
        let fee = notional * fee_bps / 10_000.0;

        let fill = Fill {
            id: Uuid::new_v4(),
            order_id: order.id,
            t: order.t,
            symbol: order.symbol.clone(),
            px,
            qty: order.qty,
            side: order.side,
            fee: Some(fee),
            liquidity: Some(liquidity),
        };
        let _ = self.tx.send(AdapterEvent::Fill(fill));
        Ok(())
    }

    async fn cancel(&self, order_id: Uuid) -> Result<(), ExecutionError> {
        let _ = self.tx.send(AdapterEvent::Cancel(OrderCancel {
            id: order_id,
            t: Utc::now(),
        }));
        Ok(())
    }

    fn events(&self) -> mpsc::UnboundedReceiver<AdapterEvent> {
        self.rx
            .lock()
            .take()
            .expect("PaperAdapter::events called more than once")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::instrument::{FeeSchedule, PairMeta, ProductType};
    use crate::strategy::intent::{IntentMeta, OrderType, Tif};

    fn order(px: f64) -> OrderIntent {
        OrderIntent {
            id: Uuid::new_v4(),
            t: Utc::now(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            qty: 1.0,
            order_type: OrderType::Lmt,
            tif: Tif::Ioc,
            account: "acct".into(),
            px: Some(px),
            meta: IntentMeta {
                expected_fee_bps: Some(10.0),
                liquidity: Some(Liquidity::Taker),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn resubmitting_same_id_yields_at_most_one_ack() {
        let mut instruments = InstrumentRepository::new();
        instruments.register_pair(
            "BTCUSDT",
            PairMeta {
                tick_size: 0.1,
                lot_size: 0.001,
                base_asset: "BTC".into(),
                quote_asset: "USDT".into(),
            },
        );
        instruments.register_fee_schedule(FeeSchedule {
            venue: "binance".into(),
            symbol: None,
            product_type: ProductType::Spot,
            maker_bps: 8.0,
            taker_bps: 12.0,
            effective_from: Utc::now(),
            source: "test".into(),
        });

        let adapter = PaperAdapter::new("binance", instruments);
        let mut events = adapter.events();
        let intent = order(100.0);

        adapter.submit(&intent).await.unwrap();
        adapter.submit(&intent).await.unwrap();
        drop(adapter);

        let mut acks = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AdapterEvent::Ack(_)) {
                acks += 1;
            }
        }
        assert_eq!(acks, 1);
    }

    #[tokio::test]
    async fn submit_emits_a_fill_with_fee_deducted() {
        let instruments = InstrumentRepository::new();
        let adapter = PaperAdapter::new("binance", instruments);
        let mut events = adapter.events();
        let intent = order(100.0);

        adapter.submit(&intent).await.unwrap();
        let _ack = events.recv().await.unwrap();
        match events.recv().await.unwrap() {
            AdapterEvent::Fill(fill) => {
                assert_eq!(fill.px, 100.0);
                assert_eq!(fill.fee, Some(0.1));
            }
            other => panic!("expected a fill, got {other:?}"),
        }
    }
}
