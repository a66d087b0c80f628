use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{error, warn};

use crate::event::store::EventStore;
use crate::event::DomainEvent;

/// How the worker behaves when its bounded queue is full and the incoming event is
/// non-critical (§4.3).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    DropOldestNonCritical,
    Block,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldestNonCritical
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "PersistenceConfig::default_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "PersistenceConfig::default_overflow_policy")]
    pub overflow_policy: OverflowPolicy,
    #[serde(default = "PersistenceConfig::default_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,
}

impl PersistenceConfig {
    fn default_capacity() -> usize {
        10_000
    }
    fn default_overflow_policy() -> OverflowPolicy {
        OverflowPolicy::DropOldestNonCritical
    }
    fn default_drain_timeout_ms() -> u64 {
        2_000
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::default_capacity(),
            overflow_policy: Self::default_overflow_policy(),
            shutdown_drain_timeout_ms: Self::default_drain_timeout_ms(),
        }
    }
}

/// Non-blocking enqueue from the hot path to the durable [`EventStore`], with back-pressure
/// (C5). The queue is a plain `VecDeque` guarded by a mutex rather than a channel, because the
/// overflow policy needs to inspect and possibly evict an *arbitrary* queued element
/// (`drop-oldest-non-critical` may need to skip over a critical event sitting at the front).
pub struct PersistenceWorker {
    config: PersistenceConfig,
    queue: Mutex<VecDeque<DomainEvent>>,
    notify: Notify,
    store: Arc<dyn EventStore>,
    degraded: Arc<std::sync::atomic::AtomicBool>,

    pub drops: AtomicU64,
    pub inline_writes: AtomicU64,
    pub high_watermark_warnings: AtomicU64,
}

impl PersistenceWorker {
    pub fn new(config: PersistenceConfig, store: Arc<dyn EventStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            store,
            degraded: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            drops: AtomicU64::new(0),
            inline_writes: AtomicU64::new(0),
            high_watermark_warnings: AtomicU64::new(0),
        })
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Non-blocking enqueue. Critical events are never silently dropped: if the queue is full
    /// they are appended synchronously and counted as a stall (§4.3, §4.15). Non-critical
    /// events follow `overflow_policy` once the queue is full.
    pub fn enqueue(&self, event: DomainEvent) {
        let capacity = self.config.queue_capacity;
        let high_watermark = (capacity as f64 * 0.85) as usize;

        let mut queue = self.queue.lock();

        if queue.len() >= high_watermark {
            self.high_watermark_warnings.fetch_add(1, Ordering::Relaxed);
            warn!(
                depth = queue.len(),
                capacity, "persistence queue above high watermark"
            );
        }

        if queue.len() < capacity {
            queue.push_back(event);
            drop(queue);
            self.notify.notify_one();
            return;
        }

        // Queue is full.
        if event.payload.is_critical() {
            drop(queue);
            self.force_synchronous_append(event);
            return;
        }

        match self.config.overflow_policy {
            OverflowPolicy::DropOldestNonCritical => {
                // Evict the oldest non-critical entry to make room; if every queued entry is
                // critical, fall back to a synchronous append rather than drop anything.
                if let Some(idx) = queue.iter().position(|e| !e.payload.is_critical()) {
                    queue.remove(idx);
                    self.drops.fetch_add(1, Ordering::Relaxed);
                    queue.push_back(event);
                    drop(queue);
                    self.notify.notify_one();
                } else {
                    drop(queue);
                    self.force_synchronous_append(event);
                }
            }
            OverflowPolicy::Block => {
                // The hot path is single-threaded cooperative (§5); a bounded spin-wait here
                // would deadlock it, so `Block` degrades to a synchronous append with a
                // counted stall instead of an actual blocking wait.
                drop(queue);
                self.force_synchronous_append(event);
            }
        }
    }

    fn force_synchronous_append(&self, event: DomainEvent) {
        self.inline_writes.fetch_add(1, Ordering::Relaxed);
        match self.store.append(vec![event]) {
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "persistence overflow: synchronous append failed");
                self.degraded.store(true, Ordering::Relaxed);
            }
        }
    }

    /// Runs the background drain loop. Intended to be spawned as a tokio task; returns only
    /// when `shutdown` resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    self.drain_batch();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(50)) => {
                    self.drain_batch();
                }
            }
        }
        self.drain_remaining_on_shutdown().await;
    }

    fn drain_batch(&self) {
        let batch: Vec<DomainEvent> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if batch.is_empty() {
            return;
        }
        if let Err(err) = self.store.append(batch) {
            error!(error = %err, "persistence worker append failed");
            self.degraded.store(true, Ordering::Relaxed);
        }
    }

    async fn drain_remaining_on_shutdown(&self) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.shutdown_drain_timeout_ms);
        while tokio::time::Instant::now() < deadline && self.queue_depth() > 0 {
            self.drain_batch();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Final flush regardless of whether the deadline was hit.
        self.drain_batch();
        let _ = self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::store::memory::InMemoryEventStore;
    use crate::event::EventPayload;
    use crate::market::Tick;
    use chrono::Utc;

    fn tick_event() -> DomainEvent {
        DomainEvent::new(
            EventPayload::MarketTick(Tick {
                t: 0,
                symbol: "BTCUSDT".into(),
                bid: Some(1.0),
                ask: Some(1.1),
                last: None,
                venue: "binance".into(),
            }),
            Utc::now(),
        )
    }

    fn fill_event() -> DomainEvent {
        DomainEvent::new(
            EventPayload::OrderFill(crate::event::Fill {
                id: uuid::Uuid::new_v4(),
                order_id: uuid::Uuid::new_v4(),
                t: Utc::now(),
                symbol: "BTCUSDT".into(),
                px: 100.0,
                qty: 1.0,
                side: crate::strategy::intent::Side::Buy,
                fee: None,
                liquidity: None,
            }),
            Utc::now(),
        )
    }

    #[test]
    fn critical_event_forces_synchronous_append_when_queue_full() {
        let store = Arc::new(InMemoryEventStore::new());
        let worker = PersistenceWorker::new(
            PersistenceConfig {
                queue_capacity: 1,
                ..Default::default()
            },
            store.clone(),
        );

        worker.enqueue(tick_event());
        assert_eq!(worker.queue_depth(), 1);

        worker.enqueue(fill_event());
        // Critical event bypassed the full queue and was written inline.
        assert_eq!(worker.inline_writes.load(Ordering::Relaxed), 1);
        assert_eq!(store.tail(), 1);
    }

    #[test]
    fn drop_oldest_non_critical_evicts_rather_than_blocks() {
        let store = Arc::new(InMemoryEventStore::new());
        let worker = PersistenceWorker::new(
            PersistenceConfig {
                queue_capacity: 1,
                overflow_policy: OverflowPolicy::DropOldestNonCritical,
                ..Default::default()
            },
            store,
        );

        worker.enqueue(tick_event());
        worker.enqueue(tick_event());

        assert_eq!(worker.drops.load(Ordering::Relaxed), 1);
        assert_eq!(worker.queue_depth(), 1);
    }
}
