use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use super::Tick;
use crate::clock::Clock;

/// Lifecycle hooks a [`FeedAdapter`] may report through (§6 "Feed adapter interface").
pub trait FeedLifecycleHooks: Send + Sync {
    fn on_status_change(&self, _venue: &str, _symbol: &str, _status: FeedStatus) {}
    fn on_reconnect(&self, _venue: &str, _symbol: &str) {}
    fn on_tick(&self, _tick: &Tick) {}
}

/// Per-(venue, symbol) feed adapter contract (§6). Reconnect is the adapter's own
/// responsibility (§4.4) — the [`FeedManager`] only observes status and records telemetry.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    fn id(&self) -> String;
    async fn connect(&self, hooks: Arc<dyn FeedLifecycleHooks>);
    async fn disconnect(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Snapshot of one feed's health, exposed via the control plane (§4.4).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FeedHealth {
    pub status: FeedStatus,
    pub reconnects: u64,
    pub last_tick_ts: Option<DateTime<Utc>>,
    pub age_seconds: f64,
}

struct FeedState {
    health: RwLock<FeedHealth>,
}

/// Multi-venue tick ingestion with per-feed health tracking (C7). Wires lifecycle hooks for
/// every configured `(venue, symbol)` adapter and exposes a merged `marks$` stream plus a
/// per-source health snapshot list. A persistent disconnect surfaces via `feed.status`
/// telemetry and does not halt the pipeline (§4.4 Failure).
pub struct FeedManager {
    clock: Arc<dyn Clock>,
    states: RwLock<HashMap<String, Arc<FeedState>>>,
    marks_tx: broadcast::Sender<Tick>,
    status_tx: broadcast::Sender<(String, FeedStatus)>,
}

impl FeedManager {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        let (marks_tx, _) = broadcast::channel(8192);
        let (status_tx, _) = broadcast::channel(1024);
        Arc::new(Self {
            clock,
            states: RwLock::new(HashMap::new()),
            marks_tx,
            status_tx,
        })
    }

    pub fn marks(&self) -> broadcast::Receiver<Tick> {
        self.marks_tx.subscribe()
    }

    pub fn status_stream(&self) -> broadcast::Receiver<(String, FeedStatus)> {
        self.status_tx.subscribe()
    }

    fn key(venue: &str, symbol: &str) -> String {
        format!("{venue}:{symbol}")
    }

    /// Registers a feed source. Deduplicated by `(venue, symbol)` identity, matching §4.7's
    /// "feed managers are deduplicated by identity before a composite is exposed".
    pub fn register(self: &Arc<Self>, venue: &str, symbol: &str) -> FeedHandle {
        let key = Self::key(venue, symbol);
        let mut states = self.states.write();
        let state = states.entry(key.clone()).or_insert_with(|| {
            Arc::new(FeedState {
                health: RwLock::new(FeedHealth {
                    status: FeedStatus::Connecting,
                    reconnects: 0,
                    last_tick_ts: None,
                    age_seconds: 0.0,
                }),
            })
        });

        FeedHandle {
            manager: self.clone(),
            key,
            state: state.clone(),
        }
    }

    /// Health snapshot for every registered feed, keyed by `"venue:symbol"`.
    pub fn health_snapshot(&self) -> HashMap<String, FeedHealth> {
        self.states
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v.health.read()))
            .collect()
    }

    /// Periodic sampler: updates every feed's `age_seconds` gauge. Intended to be called once
    /// per second from a spawned task (§4.4).
    pub fn sample_ages(&self, now: DateTime<Utc>) {
        for state in self.states.read().values() {
            let mut health = state.health.write();
            if let Some(last) = health.last_tick_ts {
                health.age_seconds = (now - last).num_milliseconds().max(0) as f64 / 1000.0;
            }
        }
    }

    pub async fn spawn_sampler(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_ages(self.clock.now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Handle returned by [`FeedManager::register`], used by the concrete adapter to report
/// ticks/status back into the manager.
pub struct FeedHandle {
    manager: Arc<FeedManager>,
    key: String,
    state: Arc<FeedState>,
}

impl FeedHandle {
    pub fn report_tick(&self, tick: Tick) {
        {
            let mut health = self.state.health.write();
            health.last_tick_ts = Some(self.manager.clock.now());
            health.age_seconds = 0.0;
        }
        let _ = self.manager.marks_tx.send(tick);
    }

    pub fn report_status(&self, status: FeedStatus) {
        let mut health = self.state.health.write();
        if status == FeedStatus::Connected && health.status == FeedStatus::Disconnected {
            health.reconnects += 1;
            info!(feed = %self.key, reconnects = health.reconnects, "feed reconnected");
        }
        if status == FeedStatus::Disconnected {
            warn!(feed = %self.key, "feed disconnected");
        }
        health.status = status;
        let _ = self.manager.status_tx.send((self.key.clone(), status));
    }
}

/// Minimal in-process feed adapter for tests and paper runs: ticks are injected via an mpsc
/// channel rather than a real venue connection.
pub struct ChannelFeedAdapter {
    id: String,
    rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Tick>>>,
}

impl ChannelFeedAdapter {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedSender<Tick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: id.into(),
                rx: parking_lot::Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

#[async_trait]
impl FeedAdapter for ChannelFeedAdapter {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn connect(&self, hooks: Arc<dyn FeedLifecycleHooks>) {
        hooks.on_status_change(&self.id, "", FeedStatus::Connected);
        let mut rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };
        while let Some(tick) = rx.recv().await {
            hooks.on_tick(&tick);
        }
        hooks.on_status_change(&self.id, "", FeedStatus::Disconnected);
    }

    async fn disconnect(&self) {}
}
