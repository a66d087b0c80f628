use thiserror::Error;

use crate::event::store::EventStoreError;
use crate::execution::ExecutionError;
use crate::portfolio::PortfolioError;
use crate::risk::RiskError;

/// Top level error aggregate for the runtime. Individual components return their own
/// narrower error type (see each module's `error.rs`-equivalent); this exists for call
/// sites (the runtime wiring, the control plane) that need one error to propagate with `?`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("portfolio projection error: {0}")]
    Portfolio(#[from] PortfolioError),

    #[error("risk pipeline error: {0}")]
    Risk(#[from] RiskError),

    #[error("runtime is shutting down")]
    Shutdown,
}
