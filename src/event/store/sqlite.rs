use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tokio::sync::broadcast;

use super::{EventStore, EventStoreError, ReadFilter};
use crate::event::DomainEvent;

/// Relational [`EventStore`] driver backed by `rusqlite` (§6: "a relational schema with a
/// single append table keyed by `(seq, id)`"), grounded on the sqlite usage in
/// `examples/cooprefr-bettersys/rust-backend/Cargo.toml`.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    tail_tx: broadcast::Sender<DomainEvent>,
}

impl SqliteEventStore {
    pub fn open(path: &str) -> Result<Self, EventStoreError> {
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER NOT NULL,
                id TEXT NOT NULL,
                topic TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (seq, id)
            )",
            [],
        )?;
        let (tail_tx, _) = broadcast::channel(4096);
        Ok(Self {
            conn: Mutex::new(conn),
            tail_tx,
        })
    }

    pub fn in_memory() -> Result<Self, EventStoreError> {
        Self::open(":memory:")
    }

    fn current_tail(conn: &Connection) -> Result<u64, EventStoreError> {
        let seq: Option<i64> =
            conn.query_row("SELECT MAX(seq) FROM events", [], |row| row.get(0))?;
        Ok(seq.unwrap_or(0) as u64)
    }
}

impl EventStore for SqliteEventStore {
    fn append(&self, mut events: Vec<DomainEvent>) -> Result<Vec<DomainEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(events);
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut seq = Self::current_tail(&tx)?;

        for event in events.iter_mut() {
            seq += 1;
            event.seq = seq;
            let body = serde_json::to_string(event)?;
            tx.execute(
                "INSERT INTO events (seq, id, topic, body) VALUES (?1, ?2, ?3, ?4)",
                params![event.seq as i64, event.id.to_string(), event.topic(), body],
            )?;
        }
        tx.commit()?;

        for event in &events {
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
        let conn = self.conn.lock();
        let from = from.unwrap_or(0) as i64;
        let to = to.unwrap_or(i64::MAX);

        let mut stmt = conn
            .prepare("SELECT body FROM events WHERE seq > ?1 AND seq <= ?2 ORDER BY seq ASC")?;
        let rows = stmt.query_map(params![from, to], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            let body = row?;
            let event: DomainEvent = serde_json::from_str(&body)?;
            if filter.map(|f| f.matches(&event)).unwrap_or(true) {
                events.push(event);
            }
        }
        Ok(events)
    }

    fn stream(&self) -> broadcast::Receiver<DomainEvent> {
        self.tail_tx.subscribe()
    }

    fn tail(&self) -> u64 {
        Self::current_tail(&self.conn.lock()).unwrap_or(0)
    }

    fn close(&self) -> Result<(), EventStoreError> {
        Ok(())
    }
}
