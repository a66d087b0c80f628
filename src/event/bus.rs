use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use super::DomainEvent;

/// Wildcard subscription topic, delivered every [`EventPayload`](super::EventPayload) regardless
/// of its own topic (§4.1 `onAll()`).
pub const ALL_TOPICS: &str = "*";

/// A lazy sequence of [`DomainEvent`]s for one subscription. Dropping the handle (or the
/// underlying receiver going out of scope) ends the subscription's lifetime; the bus notices
/// on next emit and prunes it (§4.1 "subscription lifetimes").
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<DomainEvent>,
}

impl Subscription {
    /// Awaits the next event delivered to this subscription.
    pub async fn next(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<DomainEvent>,
}

/// Single-process typed pub/sub broker (C2). `emit` delivers synchronously to every current
/// subscriber of the event's topic and to every wildcard subscriber before returning —
/// matching the teacher's [`EventTx`](crate discarded)-style "send now, log and swallow on
/// failure" delivery, generalised from a single fan-out channel to per-topic fan-out.
///
/// A subscriber added during an `emit` does not receive that emit: new subscriptions only see
/// the subscriber list snapshot taken when delivery starts.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    topics: Mutex<HashMap<&'static str, Vec<Subscriber>>>,
    wildcard: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribe to a single topic (e.g. `"order.fill"`).
    pub fn on(&self, topic: &'static str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(topic)
            .or_default()
            .push(Subscriber { id, tx });
        Subscription { rx }
    }

    /// Subscribe to every event regardless of topic (§4.1 `onAll()`).
    pub fn on_all(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.wildcard.lock().push(Subscriber { id, tx });
        Subscription { rx }
    }

    /// Delivers `event` to every current subscriber of its topic and to every wildcard
    /// subscriber, in that order, synchronously. A subscriber whose channel has closed (the
    /// `Subscription` handle was dropped) is pruned rather than treated as an error; a send
    /// failure for any other reason is logged and swallowed so one bad subscriber cannot
    /// disrupt delivery to its siblings (§4.1).
    pub fn emit(&self, event: DomainEvent) {
        let topic = event.topic();

        {
            let mut topics = self.topics.lock();
            if let Some(subs) = topics.get_mut(topic) {
                subs.retain(|sub| match sub.tx.send(event.clone()) {
                    Ok(()) => true,
                    Err(_) => false,
                });
            }
        }

        {
            let mut wildcard = self.wildcard.lock();
            wildcard.retain(|sub| match sub.tx.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    warn!(sub_id = sub.id, "wildcard subscriber channel closed, pruning");
                    false
                }
            });
        }
    }

    pub fn emit_many(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::market::Tick;
    use chrono::Utc;

    fn tick_event() -> DomainEvent {
        DomainEvent::new(
            EventPayload::MarketTick(Tick {
                t: 0,
                symbol: "BTCUSDT".into(),
                bid: Some(100.0),
                ask: Some(100.2),
                last: None,
                venue: "binance".into(),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn delivers_to_topic_and_wildcard_subscribers() {
        let bus = EventBus::new();
        let mut topic_sub = bus.on("market.tick");
        let mut all_sub = bus.on_all();

        bus.emit(tick_event());

        assert!(topic_sub.next().await.is_some());
        assert!(all_sub.next().await.is_some());
    }

    #[tokio::test]
    async fn late_subscriber_does_not_see_earlier_emit() {
        let bus = EventBus::new();
        bus.emit(tick_event());
        let mut sub = bus.on("market.tick");

        bus.emit(tick_event());
        // Only the second emit should be observed.
        let received = sub.next().await;
        assert!(received.is_some());
        assert_eq!(bus.topics.lock().get("market.tick").map(|v| v.len()), Some(1));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned_on_next_emit() {
        let bus = EventBus::new();
        {
            let _sub = bus.on("market.tick");
        }
        bus.emit(tick_event());
        assert_eq!(bus.topics.lock().get("market.tick").map(|v| v.len()), Some(0));
    }
}
