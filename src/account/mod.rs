pub mod fill_accounting;
pub mod state;

pub use state::{AccountState, BalanceEntry};
