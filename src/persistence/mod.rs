pub mod worker;

pub use worker::{OverflowPolicy, PersistenceConfig, PersistenceWorker};
