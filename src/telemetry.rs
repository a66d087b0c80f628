use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::event::{DomainEvent, EventPayload};

/// Per-strategy counters maintained by [`StrategyTelemetry`] (C20, §4.14).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StrategyCounters {
    pub signals: u64,
    pub intents: u64,
    pub orders_submitted: u64,
    pub fills: u64,
    pub rejects: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub exit_reason_counts: HashMap<String, u64>,
}

/// Subscribes to signal/intent/order lifecycle events and maintains counters and
/// last-event timestamps per strategy, exposed as an immutable snapshot for the control
/// plane (C20).
pub struct StrategyTelemetry {
    counters: RwLock<HashMap<String, StrategyCounters>>,
}

impl StrategyTelemetry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn apply(&self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::StrategySignal(signal) => {
                self.touch(&signal.strategy_id, event.ts, |c| c.signals += 1);
            }
            EventPayload::StrategyIntent(intent) => {
                if let Some(strategy_id) = &intent.meta.strategy_id {
                    self.touch(strategy_id, event.ts, |c| c.intents += 1);
                }
            }
            EventPayload::OrderNew(intent) => {
                if let Some(strategy_id) = &intent.meta.strategy_id {
                    self.touch(strategy_id, event.ts, |c| c.orders_submitted += 1);
                    if let Some(reason) = intent.meta.reason.clone() {
                        self.touch(strategy_id, event.ts, |c| {
                            *c.exit_reason_counts.entry(reason).or_insert(0) += 1;
                        });
                    }
                }
            }
            EventPayload::OrderFill(_) => {
                // Fills don't carry strategy id directly; attribution happens via the
                // originating OrderNew, already counted above.
            }
            EventPayload::OrderReject(_) => {}
            _ => {}
        }
    }

    fn touch(&self, strategy_id: &str, ts: DateTime<Utc>, f: impl FnOnce(&mut StrategyCounters)) {
        let mut counters = self.counters.write();
        let entry = counters.entry(strategy_id.to_string()).or_default();
        f(entry);
        entry.last_event_at = Some(ts);
    }

    pub fn snapshot(&self) -> HashMap<String, StrategyCounters> {
        self.counters.read().clone()
    }

    pub fn for_strategy(&self, strategy_id: &str) -> Option<StrategyCounters> {
        self.counters.read().get(strategy_id).cloned()
    }
}

impl Default for StrategyTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::intent::Side;
    use crate::strategy::signal::Signal;
    use chrono::Utc;

    #[test]
    fn counts_signals_per_strategy() {
        let telemetry = StrategyTelemetry::new();
        let signal = Signal {
            strategy_id: "s1".into(),
            symbol: "BTCUSDT".into(),
            action: Side::Buy,
            px: None,
            t: Utc::now(),
        };
        let event = DomainEvent::new(EventPayload::StrategySignal(signal), Utc::now());
        telemetry.apply(&event);
        telemetry.apply(&event);

        let snapshot = telemetry.for_strategy("s1").unwrap();
        assert_eq!(snapshot.signals, 2);
        assert!(snapshot.last_event_at.is_some());
    }
}
