use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::intent::Side;

/// Advisory signal produced by a strategy (§3 `Signal`). Not persisted by default — it is
/// consumed in-process by the intent builder (C9) and exit engine (C18) and only becomes
/// durable once translated into an [`crate::strategy::intent::OrderIntent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy_id: String,
    pub symbol: String,
    pub action: Side,
    pub px: Option<f64>,
    pub t: DateTime<Utc>,
}
