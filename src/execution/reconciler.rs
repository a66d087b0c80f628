use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::execution::adapter::ExecutionAdapter;

/// §6 `execution.policy.reliability.reconciliation`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    pub ack_timeout_ms: i64,
    pub fill_timeout_ms: i64,
    pub poll_interval_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 5_000,
            fill_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PendingIntent {
    submitted_at: DateTime<Utc>,
    acked_at: Option<DateTime<Utc>>,
    cancel_attempted: bool,
}

/// Tracks every submitted intent until a terminal event (fill/reject/cancel) and force-cancels
/// stale ones (C14). A forced cancel is attempted at most once per deadline crossing (§4.9);
/// the reservation it guards is released only when the terminal event itself arrives, never by
/// this component directly (§5).
pub struct IntentReconciler {
    config: ReconcilerConfig,
    pending: Mutex<HashMap<Uuid, PendingIntent>>,
    pub stale_ack: std::sync::atomic::AtomicU64,
    pub stale_fill: std::sync::atomic::AtomicU64,
}

impl IntentReconciler {
    pub fn new(config: ReconcilerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            pending: Mutex::new(HashMap::new()),
            stale_ack: std::sync::atomic::AtomicU64::new(0),
            stale_fill: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn track_submitted(&self, order_id: Uuid, t: DateTime<Utc>) {
        self.pending.lock().insert(
            order_id,
            PendingIntent {
                submitted_at: t,
                acked_at: None,
                cancel_attempted: false,
            },
        );
    }

    pub fn mark_acked(&self, order_id: Uuid, t: DateTime<Utc>) {
        if let Some(entry) = self.pending.lock().get_mut(&order_id) {
            entry.acked_at = Some(t);
        }
    }

    /// Removes the tracked entry on any terminal event (fill, reject, cancel) per §4.9.
    pub fn mark_terminal(&self, order_id: Uuid) {
        self.pending.lock().remove(&order_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Evaluates ack/fill deadlines against `now`, attempting one cancel per newly-stale
    /// intent via `adapter`. Call on a `pollIntervalMs` timer (§4.9).
    pub async fn tick(&self, adapter: &dyn ExecutionAdapter, now: DateTime<Utc>) {
        let due_for_cancel: Vec<Uuid> = {
            let mut pending = self.pending.lock();
            let mut due = Vec::new();
            for (order_id, entry) in pending.iter_mut() {
                if entry.cancel_attempted {
                    continue;
                }
                match entry.acked_at {
                    None => {
                        if (now - entry.submitted_at).num_milliseconds() >= self.config.ack_timeout_ms {
                            self.stale_ack.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            entry.cancel_attempted = true;
                            due.push(*order_id);
                        }
                    }
                    Some(acked_at) => {
                        if (now - acked_at).num_milliseconds() >= self.config.fill_timeout_ms {
                            self.stale_fill.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                            entry.cancel_attempted = true;
                            due.push(*order_id);
                        }
                    }
                }
            }
            due
        };

        for order_id in due_for_cancel {
            info!(%order_id, "forcing cancel on stale intent");
            let _ = adapter.cancel(order_id).await;
        }
    }

    /// Cancels every outstanding intent, called once during shutdown (§5).
    pub async fn cancel_all_outstanding(&self, adapter: &dyn ExecutionAdapter) {
        let ids: Vec<Uuid> = self.pending.lock().keys().copied().collect();
        for order_id in ids {
            let _ = adapter.cancel(order_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::adapter::{AdapterEvent, PaperAdapter};
    use crate::market::instrument::InstrumentRepository;

    #[tokio::test]
    async fn ack_timeout_triggers_exactly_one_cancel() {
        let reconciler = IntentReconciler::new(ReconcilerConfig {
            ack_timeout_ms: 10,
            fill_timeout_ms: 30_000,
            poll_interval_ms: 5,
        });
        let adapter = PaperAdapter::new("binance", InstrumentRepository::new());
        let mut events = adapter.events();

        let order_id = Uuid::new_v4();
        let t0 = Utc::now();
        reconciler.track_submitted(order_id, t0);

        reconciler.tick(&adapter, t0).await;
        assert_eq!(reconciler.stale_ack.load(std::sync::atomic::Ordering::Relaxed), 0);

        let t1 = t0 + chrono::Duration::milliseconds(20);
        reconciler.tick(&adapter, t1).await;
        reconciler.tick(&adapter, t1).await;

        assert_eq!(reconciler.stale_ack.load(std::sync::atomic::Ordering::Relaxed), 1);
        let mut cancels = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AdapterEvent::Cancel(_)) {
                cancels += 1;
            }
        }
        assert_eq!(cancels, 1);
    }

    #[test]
    fn terminal_event_removes_pending_entry() {
        let reconciler = IntentReconciler::new(ReconcilerConfig::default());
        let order_id = Uuid::new_v4();
        reconciler.track_submitted(order_id, Utc::now());
        assert_eq!(reconciler.pending_count(), 1);
        reconciler.mark_terminal(order_id);
        assert_eq!(reconciler.pending_count(), 0);
    }
}
