use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::account::AccountState;
use crate::event::ring_buffer::RingBuffer;
use crate::event::store::EventStore;
use crate::metrics::Metrics;
use crate::portfolio::PortfolioProjection;
use crate::risk_breach::RiskBreachMonitor;
use crate::telemetry::StrategyTelemetry;

/// Degraded-subsystem flags the runtime flips when a component reports persistent trouble
/// (§7 "the runtime continues serving read endpoints and reports `status.degraded=true`").
#[derive(Default)]
pub struct DegradedFlags {
    pub feeds: AtomicBool,
    pub execution: AtomicBool,
    pub persistence: AtomicBool,
}

impl DegradedFlags {
    pub fn any(&self) -> bool {
        self.feeds.load(Ordering::Relaxed)
            || self.execution.load(Ordering::Relaxed)
            || self.persistence.load(Ordering::Relaxed)
    }

    pub fn list(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.feeds.load(Ordering::Relaxed) {
            out.push("feeds");
        }
        if self.execution.load(Ordering::Relaxed) {
            out.push("execution");
        }
        if self.persistence.load(Ordering::Relaxed) {
            out.push("persistence");
        }
        out
    }
}

/// Shared read-only handles the HTTP surface (C21) queries; the runtime assembles this once at
/// startup and every handler only reads from it (§6 "Control-plane HTTP (read-only)").
#[derive(Clone)]
pub struct AppState {
    pub ready: Arc<AtomicBool>,
    pub degraded: Arc<DegradedFlags>,
    pub portfolio: Arc<parking_lot::Mutex<PortfolioProjection>>,
    pub account: Arc<AccountState>,
    pub telemetry: Arc<StrategyTelemetry>,
    pub metrics: Arc<Metrics>,
    pub ring_buffer: Arc<RingBuffer>,
    pub store: Arc<dyn EventStore>,
    pub breach_monitor: Arc<RiskBreachMonitor>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

fn default_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(100).min(10_000)
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    if !state.ready.load(Ordering::Relaxed) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"ready": false}))).into_response();
    }
    let degraded = state.degraded.any();
    let body = serde_json::json!({
        "ready": true,
        "degraded": degraded,
        "degradedSubsystems": state.degraded.list(),
        "killSwitch": state.breach_monitor.kill_switch_engaged(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn pnl(State(state): State<AppState>) -> impl IntoResponse {
    let analytics = state.portfolio.lock().analytics(chrono::Utc::now());
    Json(analytics)
}

async fn positions(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.portfolio.lock().snapshot(chrono::Utc::now());
    Json(snapshot.positions)
}

#[derive(Serialize)]
struct RecentOrders {
    orders: Vec<crate::strategy::intent::OrderIntent>,
}

async fn orders_recent(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    let limit = default_limit(q.limit);
    let orders = state
        .ring_buffer
        .recent(limit.max(1024))
        .into_iter()
        .filter_map(|e| match e.payload {
            crate::event::EventPayload::OrderNew(order) => Some(order),
            _ => None,
        })
        .rev()
        .take(limit)
        .collect();
    Json(RecentOrders { orders })
}

async fn events_recent(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    let limit = default_limit(q.limit);
    Json(state.ring_buffer.recent(limit))
}

async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let rx = state.store.stream();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        item.ok().and_then(|event| {
            serde_json::to_string(&event)
                .ok()
                .map(|json| Ok(SseEvent::default().data(json)))
        })
    });
    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn logs_stream() -> Sse<impl Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    // Log records are emitted via `tracing`; this surface exists to satisfy the read-only
    // control-plane contract (§6) for a log sink the runtime has not wired a subscriber into.
    Sse::new(stream::empty())
}

async fn account_balances(State(state): State<AppState>) -> impl IntoResponse {
    let balances = state.account.all_balances();
    let rendered: Vec<_> = balances
        .into_iter()
        .map(|((venue, asset), entry)| {
            serde_json::json!({"venue": venue, "asset": asset, "total": entry.total, "available": entry.available})
        })
        .collect();
    Json(rendered)
}

async fn account_margin(State(_state): State<AppState>) -> impl IntoResponse {
    // Margin accounting is out of scope for the account-state projection (§1 Non-goals cover
    // margin-call automation); this reports the static shape callers expect with zeroed values.
    Json(serde_json::json!({"committed": 0.0, "collateral": 0.0}))
}

async fn trades(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    let limit = default_limit(q.limit);
    let fills: Vec<_> = state
        .ring_buffer
        .recent(limit.max(1024))
        .into_iter()
        .filter_map(|e| match e.payload {
            crate::event::EventPayload::OrderFill(fill) => Some(fill),
            _ => None,
        })
        .rev()
        .take(limit)
        .collect();
    Json(fills)
}

async fn backtest_artifacts() -> impl IntoResponse {
    // No backtest runner is wired into this runtime (§1 Non-goals); the endpoint returns an
    // empty artifact list rather than 404 so control-plane clients built against the full
    // interface keep working.
    Json(Vec::<serde_json::Value>::new())
}

async fn backtest_artifacts_history(Query(_q): Query<LimitQuery>) -> impl IntoResponse {
    Json(Vec::<serde_json::Value>::new())
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    (StatusCode::OK, state.metrics.render_text()).into_response()
}

/// Builds the read-only axum router (C21, §6). Every route only reads from [`AppState`]; there
/// is deliberately no mutating route besides what `tower-http`'s layers add (cors, trace).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/pnl", get(pnl))
        .route("/positions", get(positions))
        .route("/orders/recent", get(orders_recent))
        .route("/events/recent", get(events_recent))
        .route("/events", get(events_stream))
        .route("/logs", get(logs_stream))
        .route("/account/balances", get(account_balances))
        .route("/account/margin", get(account_margin))
        .route("/trades", get(trades))
        .route("/backtest/artifacts", get(backtest_artifacts))
        .route("/backtest/artifacts/history", get(backtest_artifacts_history))
        .route("/metrics", get(metrics_text))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::store::memory::InMemoryEventStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            ready: Arc::new(AtomicBool::new(true)),
            degraded: Arc::new(DegradedFlags::default()),
            portfolio: Arc::new(parking_lot::Mutex::new(PortfolioProjection::new(10_000.0, 250))),
            account: Arc::new(AccountState::new()),
            telemetry: Arc::new(StrategyTelemetry::new()),
            metrics: Arc::new(Metrics::new()),
            ring_buffer: Arc::new(RingBuffer::new(1_000)),
            store: Arc::new(InMemoryEventStore::new()),
            breach_monitor: Arc::new(RiskBreachMonitor::new(crate::risk_breach::RiskBreachConfig {
                nav_floor: 0.0,
                max_drawdown: 1_000_000.0,
            })),
        }
    }

    #[tokio::test]
    async fn status_returns_503_when_not_ready() {
        let state = test_state();
        state.ready.store(false, Ordering::Relaxed);
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn status_returns_200_once_ready() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_serves_text_exposition() {
        let state = test_state();
        state.metrics.incr_ticks_ingested();
        let app = router(state);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
