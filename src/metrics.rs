use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// A single counter or gauge, keyed by a label string (`""` when unlabeled).
#[derive(Default)]
struct LabeledCounters {
    values: RwLock<HashMap<String, AtomicU64>>,
}

impl LabeledCounters {
    fn incr(&self, label: &str, delta: u64) {
        if let Some(existing) = self.values.read().get(label) {
            existing.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.values
            .write()
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    fn set_bits(&self, label: &str, bits: u64) {
        self.values
            .write()
            .entry(label.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(bits, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Vec<(String, u64)> {
        self.values
            .read()
            .iter()
            .map(|(label, value)| (label.clone(), value.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Process-wide metrics registry (§9 "encapsulate in a process-wide Metrics ... handle with
/// clear init/teardown boundaries; no ambient singletons"). Every metric name in §6's table
/// gets one labeled counter/gauge here; gauges store an f64 reinterpreted as bits since there
/// is no atomic f64 in std.
pub struct Metrics {
    ticks_ingested: LabeledCounters,
    orders_submitted: LabeledCounters,
    risk_rejected: LabeledCounters,
    portfolio_nav: LabeledCounters,
    feed_status: LabeledCounters,
    feed_reconnects: LabeledCounters,
    feed_tick_age: LabeledCounters,
    persistence_queue_depth: LabeledCounters,
    persistence_queue_drops: LabeledCounters,
    persistence_inline_writes: LabeledCounters,
    execution_retries: LabeledCounters,
    execution_failures: LabeledCounters,
    execution_circuit_state: LabeledCounters,
    execution_circuit_trips: LabeledCounters,
    execution_pending_intents: LabeledCounters,
    execution_stale_intents: LabeledCounters,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_ingested: LabeledCounters::default(),
            orders_submitted: LabeledCounters::default(),
            risk_rejected: LabeledCounters::default(),
            portfolio_nav: LabeledCounters::default(),
            feed_status: LabeledCounters::default(),
            feed_reconnects: LabeledCounters::default(),
            feed_tick_age: LabeledCounters::default(),
            persistence_queue_depth: LabeledCounters::default(),
            persistence_queue_drops: LabeledCounters::default(),
            persistence_inline_writes: LabeledCounters::default(),
            execution_retries: LabeledCounters::default(),
            execution_failures: LabeledCounters::default(),
            execution_circuit_state: LabeledCounters::default(),
            execution_circuit_trips: LabeledCounters::default(),
            execution_pending_intents: LabeledCounters::default(),
            execution_stale_intents: LabeledCounters::default(),
        }
    }

    pub fn incr_ticks_ingested(&self) {
        self.ticks_ingested.incr("", 1);
    }

    pub fn incr_orders_submitted(&self) {
        self.orders_submitted.incr("", 1);
    }

    pub fn incr_risk_rejected(&self) {
        self.risk_rejected.incr("", 1);
    }

    pub fn set_portfolio_nav(&self, nav: f64) {
        self.portfolio_nav.set_bits("", nav.to_bits());
    }

    pub fn set_feed_status(&self, feed: &str, status_code: u64) {
        self.feed_status.set_bits(feed, status_code);
    }

    pub fn set_feed_reconnects(&self, feed: &str, count: u64) {
        self.feed_reconnects.set_bits(feed, count);
    }

    pub fn set_feed_tick_age(&self, feed: &str, age_seconds: f64) {
        self.feed_tick_age.set_bits(feed, age_seconds.to_bits());
    }

    pub fn set_persistence_queue_depth(&self, depth: u64) {
        self.persistence_queue_depth.set_bits("", depth);
    }

    pub fn incr_persistence_queue_drops(&self) {
        self.persistence_queue_drops.incr("", 1);
    }

    pub fn incr_persistence_inline_writes(&self) {
        self.persistence_inline_writes.incr("", 1);
    }

    pub fn incr_execution_retries(&self, venue: &str) {
        self.execution_retries.incr(venue, 1);
    }

    pub fn incr_execution_failures(&self, venue: &str, reason: &str) {
        self.execution_failures.incr(&format!("{venue},{reason}"), 1);
    }

    pub fn set_execution_circuit_state(&self, venue: &str, value: f64) {
        self.execution_circuit_state.set_bits(venue, value.to_bits());
    }

    pub fn incr_execution_circuit_trips(&self, venue: &str) {
        self.execution_circuit_trips.incr(venue, 1);
    }

    pub fn set_execution_pending_intents(&self, venue: &str, count: u64) {
        self.execution_pending_intents.set_bits(venue, count);
    }

    pub fn incr_execution_stale_intents(&self, venue: &str, reason: &str) {
        self.execution_stale_intents
            .incr(&format!("{venue},{reason}"), 1);
    }

    /// Renders every metric as a flat text exposition (§6 `GET /metrics`). Gauges that were
    /// stored via `to_bits` are rendered back through `f64::from_bits`; counters are rendered
    /// as plain integers.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        write_counter(&mut out, "ticksIngested", &self.ticks_ingested, false);
        write_counter(&mut out, "ordersSubmitted", &self.orders_submitted, false);
        write_counter(&mut out, "riskRejected", &self.risk_rejected, false);
        write_counter(&mut out, "portfolioNav", &self.portfolio_nav, true);
        write_counter(&mut out, "feedStatus", &self.feed_status, false);
        write_counter(&mut out, "feedReconnects", &self.feed_reconnects, false);
        write_counter(&mut out, "feedTickAge", &self.feed_tick_age, true);
        write_counter(&mut out, "persistenceQueueDepth", &self.persistence_queue_depth, false);
        write_counter(&mut out, "persistenceQueueDrops", &self.persistence_queue_drops, false);
        write_counter(
            &mut out,
            "persistenceInlineWrites",
            &self.persistence_inline_writes,
            false,
        );
        write_counter(&mut out, "executionRetries", &self.execution_retries, false);
        write_counter(&mut out, "executionFailures", &self.execution_failures, false);
        write_counter(&mut out, "executionCircuitState", &self.execution_circuit_state, true);
        write_counter(&mut out, "executionCircuitTrips", &self.execution_circuit_trips, false);
        write_counter(
            &mut out,
            "executionPendingIntents",
            &self.execution_pending_intents,
            false,
        );
        write_counter(
            &mut out,
            "executionStaleIntents",
            &self.execution_stale_intents,
            false,
        );
        out
    }
}

fn write_counter(out: &mut String, name: &str, counters: &LabeledCounters, as_float_bits: bool) {
    for (label, bits) in counters.snapshot() {
        let value = if as_float_bits {
            f64::from_bits(bits).to_string()
        } else {
            bits.to_string()
        };
        if label.is_empty() {
            let _ = writeln!(out, "{name} {value}");
        } else {
            let _ = writeln!(out, "{name}{{{label}}} {value}");
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters_and_float_gauges() {
        let metrics = Metrics::new();
        metrics.incr_ticks_ingested();
        metrics.incr_ticks_ingested();
        metrics.set_portfolio_nav(10_500.25);

        let text = metrics.render_text();
        assert!(text.contains("ticksIngested 2"));
        assert!(text.contains("portfolioNav 10500.25"));
    }

    #[test]
    fn labels_are_rendered_as_prometheus_style_tags() {
        let metrics = Metrics::new();
        metrics.incr_execution_stale_intents("binance", "ack-timeout");
        let text = metrics.render_text();
        assert!(text.contains("executionStaleIntents{binance,ack-timeout} 1"));
    }
}
