use std::collections::VecDeque;

use parking_lot::RwLock;

use super::DomainEvent;

/// Bounded in-memory cache of the most recent events, backing API calls like
/// `GET /events/recent?limit=N` (§6) without round-tripping through the durable store (C4).
/// Holds read-only (cloned) copies — the ring buffer never hands out a reference the writer
/// could still be mutating, matching §3's "weak reference" ownership note.
pub struct RingBuffer {
    capacity: usize,
    events: RwLock<VecDeque<DomainEvent>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: DomainEvent) {
        let mut events = self.events.write();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Returns up to `limit` of the most recently pushed events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<DomainEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::market::Tick;
    use chrono::Utc;

    fn tick(symbol: &str) -> DomainEvent {
        DomainEvent::new(
            EventPayload::MarketTick(Tick {
                t: 0,
                symbol: symbol.to_string(),
                bid: Some(1.0),
                ask: Some(1.1),
                last: None,
                venue: "binance".into(),
            }),
            Utc::now(),
        )
    }

    #[test]
    fn evicts_oldest_once_full() {
        let buf = RingBuffer::new(2);
        buf.push(tick("A"));
        buf.push(tick("B"));
        buf.push(tick("C"));

        let recent = buf.recent(10);
        assert_eq!(recent.len(), 2);
        match (&recent[0].payload, &recent[1].payload) {
            (EventPayload::MarketTick(a), EventPayload::MarketTick(b)) => {
                assert_eq!(a.symbol, "B");
                assert_eq!(b.symbol, "C");
            }
            _ => unreachable!(),
        }
    }
}
