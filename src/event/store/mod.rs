use thiserror::Error;
use tokio::sync::broadcast;

use super::DomainEvent;

pub mod file;
pub mod memory;
pub mod sqlite;

/// Event-store specific errors (§7 `PersistenceFatal` surfaces through this).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("append batch rejected: {0}")]
    AppendRejected(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// Optional filter applied by [`EventStore::read`] — currently topic-based, matching the
/// closed set of event types in §3.
#[derive(Clone, Debug, Default)]
pub struct ReadFilter {
    pub topics: Option<Vec<&'static str>>,
}

impl ReadFilter {
    pub fn topic(topic: &'static str) -> Self {
        Self {
            topics: Some(vec![topic]),
        }
    }

    fn matches(&self, event: &DomainEvent) -> bool {
        match &self.topics {
            None => true,
            Some(topics) => topics.contains(&event.topic()),
        }
    }
}

/// Append-only log with pluggable drivers (C3). `append` is atomic per call — a batch appends
/// or is rejected as a unit — and assigns a monotonic sequence number to each event. `read`
/// is stable under concurrent appends: callers see a consistent prefix, never a partial
/// in-flight batch. Live tail consumers subscribe via [`EventStore::stream`], and folding
/// `read()` followed by subscribing to `stream()` under the same cursor yields the full
/// sequence without gaps or duplicates (§4.2).
pub trait EventStore: Send + Sync {
    /// Appends a batch atomically, assigning each event a monotonic `seq`. Returns the
    /// events with their assigned sequence numbers.
    fn append(&self, events: Vec<DomainEvent>) -> Result<Vec<DomainEvent>, EventStoreError>;

    /// Returns events in `(from, to]` sequence range (both ends inclusive-exclusive per
    /// `Option` semantics: `from=None` means "from the start", `to=None` means "to the
    /// current tail"), narrowed by `filter`.
    fn read(
        &self,
        from: Option<u64>,
        to: Option<u64>,
        filter: Option<&ReadFilter>,
    ) -> Result<Vec<DomainEvent>, EventStoreError>;

    /// Live sequence of every event appended after this call, in append order. Combined with
    /// a `read()` taken under the same cursor (the store's current tail at subscribe time)
    /// this reproduces the full ordered sequence exactly once per event.
    fn stream(&self) -> broadcast::Receiver<DomainEvent>;

    /// The sequence number of the most recently appended event, or 0 if the store is empty.
    fn tail(&self) -> u64;

    /// Flushes any pending writes. Drivers that write synchronously (memory, sqlite with
    /// `PRAGMA synchronous=FULL`) can treat this as a no-op.
    fn close(&self) -> Result<(), EventStoreError>;
}

/// Folds `read()` then subscribes to `stream()` under the same cursor, giving callers (C15,
/// C17 projections) the full ordered sequence without gaps or duplicates (§4.2 invariant).
pub fn replay_then_follow(
    store: &dyn EventStore,
    filter: Option<&ReadFilter>,
) -> (Vec<DomainEvent>, broadcast::Receiver<DomainEvent>) {
    // Subscribe first so nothing appended between the read and the subscribe is lost, then
    // read the backlog up to the tail we observed at subscribe time.
    let rx = store.stream();
    let tail = store.tail();
    let backlog = store
        .read(None, Some(tail), filter)
        .unwrap_or_default();
    (backlog, rx)
}
