use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Injectable monotonic time source (C1). Production code uses [`SystemClock`]; tests
/// substitute a [`TestClock`] that can be advanced deterministically, the same way the
/// teacher repo injects `Config`/Lego structs rather than reaching for `Utc::now()` ad-hoc.
pub trait Clock: Send + Sync + Debug {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch, the unit [`crate::market::Tick`] uses on the wire.
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

use std::fmt::Debug;

/// Real wall-clock time source.
#[derive(Debug, Copy, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct TestClock {
    now: parking_lot::Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: parking_lot::Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.now.lock();
        *guard += delta;
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.now.lock() = t;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Generates UUIDv4-style identifiers for intents, orders, and trace ids.
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}
