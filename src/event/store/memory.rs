use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{EventStore, EventStoreError, ReadFilter};
use crate::event::DomainEvent;

/// In-memory [`EventStore`] driver. Used for tests and for ephemeral (non-durable) runs; the
/// log lives entirely in a `Vec` guarded by a mutex, the simplest of the three drivers named
/// in §6.
pub struct InMemoryEventStore {
    log: Mutex<Vec<DomainEvent>>,
    tail_tx: broadcast::Sender<DomainEvent>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        let (tail_tx, _) = broadcast::channel(4096);
        Self {
            log: Mutex::new(Vec::new()),
            tail_tx,
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, mut events: Vec<DomainEvent>) -> Result<Vec<DomainEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(events);
        }

        let mut log = self.log.lock();
        let mut seq = log.len() as u64;
        for event in events.iter_mut() {
            seq += 1;
            event.seq = seq;
        }
        log.extend(events.iter().cloned());

        for event in &events {
            // A lagging/absent subscriber is not an append failure (§4.1 "no backpressure").
            let _ = self.tail_tx.send(event.clone());
        }

        Ok(events)
    }

    fn read(
        &self,
        from: Option<u64>,
        to: Option<u64>,
        filter: Option<&ReadFilter>,
    ) -> Result<Vec<DomainEvent>, EventStoreError> {
        let log = self.log.lock();
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(u64::MAX);
        Ok(log
            .iter()
            .filter(|e| e.seq > from && e.seq <= to)
            .filter(|e| filter.map(|f| f.matches(e)).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn stream(&self) -> broadcast::Receiver<DomainEvent> {
        self.tail_tx.subscribe()
    }

    fn tail(&self) -> u64 {
        self.log.lock().last().map(|e| e.seq).unwrap_or(0)
    }

    fn close(&self) -> Result<(), EventStoreError> {
        Ok(())
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
                bid: Some(1.0),
                ask: Some(1.1),
                last: None,
                venue: "binance".into(),
            }),
            Utc::now(),
        )
    }

    #[test]
    fn append_assigns_monotonic_sequence() {
        let store = InMemoryEventStore::new();
        let appended = store.append(vec![tick_event(), tick_event()]).unwrap();
        assert_eq!(appended[0].seq, 1);
        assert_eq!(appended[1].seq, 2);
        assert_eq!(store.tail(), 2);
    }

    #[test]
    fn read_is_stable_and_exactly_once() {
        let store = InMemoryEventStore::new();
        store.append(vec![tick_event()]).unwrap();
        let first_read = store.read(None, None, None).unwrap();
        store.append(vec![tick_event()]).unwrap();
        let second_read = store.read(Some(1), None, None).unwrap();

        assert_eq!(first_read.len(), 1);
        assert_eq!(second_read.len(), 1);
        assert_eq!(second_read[0].seq, 2);
    }
}
