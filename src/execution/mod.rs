pub mod adapter;
pub mod policy;
pub mod reconciler;

use thiserror::Error;

pub use adapter::{ExecutionAdapter, OrderAck, OrderReject, PaperAdapter};
pub use policy::{CircuitState, ExecutionPolicy, ReliabilityConfig};
pub use reconciler::{IntentReconciler, ReconcilerConfig};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("adapter rejected submit: {0}")]
    AdapterTransient(String),
    #[error("adapter failed permanently: {0}")]
    AdapterFatal(String),
    #[error("circuit breaker open for venue {0}")]
    CircuitOpen(String),
}
