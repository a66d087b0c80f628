use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::portfolio::PortfolioAnalytics;

/// Post-trade NAV/drawdown thresholds (§4.13).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RiskBreachConfig {
    pub nav_floor: f64,
    pub max_drawdown: f64,
}

/// A reported breach, carried as the `risk.breach` log payload (§4.13).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskBreach {
    pub nav: f64,
    pub drawdown: f64,
    pub below_nav_floor: bool,
    pub drawdown_exceeded: bool,
}

/// Post-trade watcher (C19): flags NAV-floor and drawdown breaches on every portfolio
/// analytics snapshot. This component decides nothing reversible — it reports and flags, it
/// never rejects or cancels anything itself (§4.13).
pub struct RiskBreachMonitor {
    config: RiskBreachConfig,
    kill_switch: AtomicBool,
}

impl RiskBreachMonitor {
    pub fn new(config: RiskBreachConfig) -> Self {
        Self {
            config,
            kill_switch: AtomicBool::new(false),
        }
    }

    /// Consulted by the orchestrator (C11) to reject further intents once tripped.
    pub fn kill_switch_engaged(&self) -> bool {
        self.kill_switch.load(Ordering::Relaxed)
    }

    pub fn evaluate(&self, analytics: &PortfolioAnalytics) -> Option<RiskBreach> {
        let below_nav_floor = analytics.snapshot.nav < self.config.nav_floor;
        let drawdown_exceeded = analytics.drawdown >= self.config.max_drawdown;

        if !below_nav_floor && !drawdown_exceeded {
            return None;
        }

        self.kill_switch.store(true, Ordering::Relaxed);
        let breach = RiskBreach {
            nav: analytics.snapshot.nav,
            drawdown: analytics.drawdown,
            below_nav_floor,
            drawdown_exceeded,
        };
        error!(nav = breach.nav, drawdown = breach.drawdown, "risk breach detected");
        Some(breach)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::PortfolioSnapshot;
    use chrono::Utc;

    fn analytics(nav: f64, drawdown: f64) -> PortfolioAnalytics {
        PortfolioAnalytics {
            snapshot: PortfolioSnapshot {
                t: Utc::now(),
                positions: Vec::new(),
                cash: nav,
                nav,
                realized: 0.0,
                unrealized: 0.0,
            },
            peak_nav: nav + drawdown,
            drawdown,
            drawdown_pct: 0.0,
            fees_paid: 0.0,
        }
    }

    #[test]
    fn engages_kill_switch_once_nav_floor_is_breached() {
        let monitor = RiskBreachMonitor::new(RiskBreachConfig {
            nav_floor: 900.0,
            max_drawdown: 1_000_000.0,
        });
        assert!(!monitor.kill_switch_engaged());
        let breach = monitor.evaluate(&analytics(800.0, 0.0)).unwrap();
        assert!(breach.below_nav_floor);
        assert!(monitor.kill_switch_engaged());
    }

    #[test]
    fn healthy_snapshot_reports_nothing() {
        let monitor = RiskBreachMonitor::new(RiskBreachConfig {
            nav_floor: 0.0,
            max_drawdown: 1_000_000.0,
        });
        assert!(monitor.evaluate(&analytics(1_000.0, 10.0)).is_none());
    }
}
