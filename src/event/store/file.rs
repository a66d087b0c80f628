use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{EventStore, EventStoreError, ReadFilter};
use crate::event::DomainEvent;

/// Single-file append log driver (§6): each record is a length-prefixed JSON blob with a
/// CRC32 trailer, `[u32 len][bytes json][u32 crc]`. No pack dependency supplies a CRC32
/// implementation (see DESIGN.md), so it is hand-rolled here rather than faked with a vendor
/// stub.
pub struct FileEventStore {
    path: PathBuf,
    file: Mutex<File>,
    cache: Mutex<Vec<DomainEvent>>,
    tail_tx: broadcast::Sender<DomainEvent>,
}

impl FileEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let cache = Self::load_existing(&path)?;
        let (tail_tx, _) = broadcast::channel(4096);

        Ok(Self {
            path,
            file: Mutex::new(file),
            cache: Mutex::new(cache),
            tail_tx,
        })
    }

    fn load_existing(path: &Path) -> Result<Vec<DomainEvent>, EventStoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        let mut offset = 0u64;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut body = vec![0u8; len];
            reader.read_exact(&mut body)?;

            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf)?;
            let expected_crc = u32::from_le_bytes(crc_buf);
            let actual_crc = crc32(&body);
            if actual_crc != expected_crc {
                return Err(EventStoreError::Corrupt {
                    offset,
                    reason: "crc mismatch".into(),
                });
            }

            let event: DomainEvent = serde_json::from_slice(&body)?;
            offset += 8 + len as u64;
            events.push(event);
        }

        Ok(events)
    }

    fn append_record(file: &mut File, event: &DomainEvent) -> Result<(), EventStoreError> {
        let body = serde_json::to_vec(event)?;
        let crc = crc32(&body);

        let mut buf = Vec::with_capacity(8 + body.len());
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(&crc.to_le_bytes());

        file.write_all(&buf)?;
        Ok(())
    }
}

impl EventStore for FileEventStore {
    fn append(&self, mut events: Vec<DomainEvent>) -> Result<Vec<DomainEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(events);
        }

        let mut cache = self.cache.lock();
        let mut file = self.file.lock();

        let mut seq = cache.last().map(|e| e.seq).unwrap_or(0);
        for event in events.iter_mut() {
            seq += 1;
            event.seq = seq;
        }

        // Append is atomic per call: write every record before committing any to the cache,
        // so a mid-batch io error leaves the on-disk file without a torn prefix observed by
        // readers of the in-memory cache.
        for event in &events {
            Self::append_record(&mut file, event)?;
        }
        file.flush()?;

        cache.extend(events.iter().cloned());
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
        let cache = self.cache.lock();
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(u64::MAX);
        Ok(cache
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
        self.cache.lock().last().map(|e| e.seq).unwrap_or(0)
    }

    fn close(&self) -> Result<(), EventStoreError> {
        self.file.lock().flush()?;
        Ok(())
    }
}

/// Minimal CRC-32 (IEEE 802.3, reflected) implementation — small enough to hand-roll rather
/// than pull in a dependency for a single polynomial.
fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB8_8320;
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (POLY & mask);
        }
    }
    !crc
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
    fn crc32_matches_known_vector() {
        // "123456789" -> 0xCBF43926 is the canonical CRC-32/ISO-HDLC test vector.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn round_trips_through_a_fresh_handle() {
        let dir = std::env::temp_dir().join(format!("velum-store-test-{}", uuid::Uuid::new_v4()));
        let store = FileEventStore::open(&dir).unwrap();
        store.append(vec![tick_event(), tick_event()]).unwrap();
        store.close().unwrap();
        drop(store);

        let reopened = FileEventStore::open(&dir).unwrap();
        let events = reopened.read(None, None, None).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].seq, 2);

        std::fs::remove_file(&dir).ok();
    }
}
