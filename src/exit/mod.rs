pub mod engine;

pub use engine::{ExitConfig, ExitEngine, ExitReason};
