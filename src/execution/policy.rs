use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::execution::adapter::ExecutionAdapter;
use crate::execution::ExecutionError;
use crate::strategy::intent::OrderIntent;

/// §6 `execution.policy.reliability.retry` / `.circuitBreaker`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReliabilityConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    pub half_open_max_successes: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter: 0.2,
            failure_threshold: 5,
            cooldown_ms: 30_000,
            half_open_max_successes: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Matches §6's `executionCircuitState{venue}` gauge encoding.
    pub fn as_metric_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 0.5,
        }
    }
}

struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<std::time::Instant>,
    half_open_successes: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_successes: 0,
        }
    }
}

/// Hand-rolled three-state circuit breaker (closed/open/half-open) wrapping
/// [`ExecutionAdapter::submit`] with retry (C12). No pack crate implements the breaker itself;
/// the state vocabulary follows the `CircuitBreakerService`/`CircuitBreakerValidator` pattern
/// seen in the retrieval pack's risk-management reference material, while the retry/backoff
/// timing uses the `backoff` crate the way other pack manifests use it for exchange calls.
pub struct ExecutionPolicy {
    venue: String,
    config: ReliabilityConfig,
    breaker: Mutex<Breaker>,
    pub retries: std::sync::atomic::AtomicU64,
    pub failures: std::sync::atomic::AtomicU64,
    pub trips: std::sync::atomic::AtomicU64,
}

impl ExecutionPolicy {
    pub fn new(venue: impl Into<String>, config: ReliabilityConfig) -> Arc<Self> {
        Arc::new(Self {
            venue: venue.into(),
            config,
            breaker: Mutex::new(Breaker::new()),
            retries: std::sync::atomic::AtomicU64::new(0),
            failures: std::sync::atomic::AtomicU64::new(0),
            trips: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    /// Transitions open → half-open once `cooldownMs` has elapsed, called before every submit
    /// attempt so the gauge reflects reality even between submits.
    fn refresh_state(&self, breaker: &mut Breaker) {
        if breaker.state == CircuitState::Open {
            if let Some(opened_at) = breaker.opened_at {
                if opened_at.elapsed() >= Duration::from_millis(self.config.cooldown_ms) {
                    breaker.state = CircuitState::HalfOpen;
                    breaker.half_open_successes = 0;
                }
            }
        }
    }

    fn on_success(&self) {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.half_open_successes += 1;
                if breaker.half_open_successes >= self.config.half_open_max_successes {
                    breaker.state = CircuitState::Closed;
                    breaker.consecutive_failures = 0;
                }
            }
            CircuitState::Closed => {
                breaker.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let mut breaker = self.breaker.lock();
        match breaker.state {
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(std::time::Instant::now());
                self.trips.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    breaker.state = CircuitState::Open;
                    breaker.opened_at = Some(std::time::Instant::now());
                    self.trips.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Submits `order` via `adapter`, retrying transient failures with jittered capped backoff
    /// and short-circuiting immediately with [`ExecutionError::CircuitOpen`] while the breaker
    /// is open (§4.8).
    pub async fn submit(
        &self,
        adapter: &dyn ExecutionAdapter,
        order: &OrderIntent,
    ) -> Result<(), ExecutionError> {
        {
            let mut breaker = self.breaker.lock();
            self.refresh_state(&mut breaker);
            if breaker.state == CircuitState::Open {
                return Err(ExecutionError::CircuitOpen(self.venue.clone()));
            }
        }

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.base_delay_ms))
            .with_max_interval(Duration::from_millis(self.config.max_delay_ms))
            .with_randomization_factor(self.config.jitter)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match adapter.submit(order).await {
                Ok(()) => {
                    self.on_success();
                    return Ok(());
                }
                Err(err) => {
                    self.failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    self.on_failure();
                    if attempt >= self.config.max_attempts {
                        return Err(err);
                    }
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(err);
                    };
                    warn!(order_id = %order.id, venue = %self.venue, attempt, "retrying order submit after transient failure");
                    self.retries.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
