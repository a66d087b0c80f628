//! Wires every component into a running system (§5 "Runtime composition & threading model").
//! [`Runtime::new`] assembles the graph from a [`RuntimeConfig`]; [`Runtime::run`] drives it
//! until shutdown, tearing components down in the reverse of their build order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as PLMutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::account::fill_accounting::adjustments_for_fill;
use crate::account::AccountState;
use crate::clock::{Clock, SystemClock};
use crate::config::{RuntimeConfig, StrategyConfig};
use crate::control_plane::{self, AppState, DegradedFlags};
use crate::event::bus::EventBus;
use crate::event::ring_buffer::RingBuffer;
use crate::event::store::EventStore;
use crate::event::{DomainEvent, EventPayload, FeedStatusEvent};
use crate::exit::engine::RiskActionConfig;
use crate::exit::{ExitConfig, ExitEngine};
use crate::execution::adapter::{AdapterEvent, ExecutionAdapter, PaperAdapter};
use crate::execution::policy::ExecutionPolicy;
use crate::execution::reconciler::IntentReconciler;
use crate::market::feed::{
    ChannelFeedAdapter, FeedAdapter, FeedHandle, FeedLifecycleHooks, FeedManager, FeedStatus,
};
use crate::market::instrument::InstrumentRepository;
use crate::market::Tick;
use crate::metrics::Metrics;
use crate::orchestrator::{dedupe_feed_keys, Orchestrator, RoutedIntent, StrategySlot};
use crate::persistence::PersistenceWorker;
use crate::portfolio::PortfolioProjection;
use crate::risk::pipeline::{RiskContext, RiskPipeline};
use crate::risk_breach::RiskBreachMonitor;
use crate::strategy::builtins::{ArbitrageLogic, ArbitrageParams, MomentumLogic, MomentumParams};
use crate::strategy::runner::StrategyLogic;
use crate::strategy::runner::StrategyRunner;
use crate::telemetry::StrategyTelemetry;
use crate::RuntimeError;

/// Bridges [`AccountState`]/[`PortfolioProjection`] into the narrow view the risk pipeline
/// needs, per [`RiskContext`]'s decoupling contract (§9). Margin accounting is out of scope
/// (§1 Non-goals), so `committed_margin` always reports zero, mirroring the control plane's
/// static `/account/margin` stub.
struct RuntimeContext {
    account: Arc<AccountState>,
    portfolio: Arc<PLMutex<PortfolioProjection>>,
}

impl RiskContext for RuntimeContext {
    fn position(&self, symbol: &str) -> f64 {
        self.portfolio.lock().position(symbol)
    }

    fn mark_price(&self, symbol: &str) -> Option<f64> {
        self.portfolio.lock().mark_price(symbol)
    }

    fn available_quote(&self, account: &str, quote_asset: &str) -> f64 {
        self.account.balance(account, quote_asset).available
    }

    fn available_base(&self, account: &str, base_asset: &str) -> f64 {
        self.account.balance(account, base_asset).available
    }

    fn committed_margin(&self, _account: &str) -> f64 {
        0.0
    }
}

struct FeedHookBridge {
    handle: FeedHandle,
}

impl FeedLifecycleHooks for FeedHookBridge {
    fn on_status_change(&self, _venue: &str, _symbol: &str, status: FeedStatus) {
        self.handle.report_status(status);
    }

    fn on_tick(&self, tick: &Tick) {
        self.handle.report_tick(tick.clone());
    }
}

fn build_strategy_logic(cfg: &StrategyConfig) -> Result<Box<dyn StrategyLogic>, RuntimeError> {
    match cfg.strategy_type.as_str() {
        "momentum" => {
            let params: MomentumParams = serde_json::from_value(cfg.params.clone())
                .map_err(|e| RuntimeError::ConfigInvalid(format!("strategy {}: {e}", cfg.id)))?;
            Ok(Box::new(MomentumLogic::new(params)))
        }
        "arbitrage" => {
            let params: ArbitrageParams = serde_json::from_value(cfg.params.clone())
                .map_err(|e| RuntimeError::ConfigInvalid(format!("strategy {}: {e}", cfg.id)))?;
            Ok(Box::new(ArbitrageLogic::new(params)))
        }
        other => Err(RuntimeError::ConfigInvalid(format!(
            "strategy {} has unknown type `{other}`",
            cfg.id
        ))),
    }
}

fn default_exit_config() -> ExitConfig {
    ExitConfig {
        max_symbol_exposure_usd: None,
        max_gross_exposure_usd: None,
        max_drawdown_pct: None,
        margin_buffer_pct: None,
        risk_action: RiskActionConfig::CloseSymbol,
        min_hold_ms: 0,
        max_hold_ms: None,
        epsilon_bps: 5.0,
        sigma_lookback_sec: 300,
        tp_sigma: 3.0,
        sl_sigma: 3.0,
        init_arm_pnl_sigmas: 2.0,
        retrace_pct: 0.3,
    }
}

fn feed_status_code(status: FeedStatus) -> u64 {
    match status {
        FeedStatus::Connecting => 0,
        FeedStatus::Connected => 1,
        FeedStatus::Disconnected => 2,
    }
}

/// The assembled runtime graph (§5). Every field is a handle an async task or HTTP handler
/// reads or drives; the struct itself holds no exclusive state beyond what's behind its own
/// locks, so it's freely `Arc`-shared across the tasks `run()` spawns.
pub struct Runtime {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    store: Arc<dyn EventStore>,
    persistence: Arc<PersistenceWorker>,
    feeds: Arc<FeedManager>,
    instruments: InstrumentRepository,
    risk: Arc<RiskPipeline>,
    orchestrator: PLMutex<Orchestrator>,
    adapters: HashMap<String, Arc<dyn ExecutionAdapter>>,
    policies: HashMap<String, Arc<ExecutionPolicy>>,
    reconcilers: HashMap<String, Arc<IntentReconciler>>,
    feed_senders: HashMap<String, mpsc::UnboundedSender<Tick>>,
    feed_adapters: PLMutex<Option<Vec<(Arc<ChannelFeedAdapter>, FeedHandle)>>>,
    adapter_events: PLMutex<Option<HashMap<String, mpsc::UnboundedReceiver<AdapterEvent>>>>,
    account: Arc<AccountState>,
    portfolio: Arc<PLMutex<PortfolioProjection>>,
    exit_engines: PLMutex<HashMap<String, ExitEngine>>,
    breach_monitor: Arc<RiskBreachMonitor>,
    telemetry: Arc<StrategyTelemetry>,
    metrics: Arc<Metrics>,
    ring_buffer: Arc<RingBuffer>,
    ready: Arc<AtomicBool>,
    degraded: Arc<DegradedFlags>,
    stale_seen: PLMutex<HashMap<String, (u64, u64)>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runtime {
    /// Builds the runtime graph with the real wall-clock ([`SystemClock`]). `instruments` is
    /// supplied pre-populated by the caller, the same way C6 stands in for an external
    /// market-structure-sync collaborator rather than loading itself from config.
    pub fn new(
        config: RuntimeConfig,
        instruments: InstrumentRepository,
        store: Arc<dyn EventStore>,
    ) -> Result<Arc<Self>, RuntimeError> {
        Self::with_clock(config, instruments, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RuntimeConfig,
        instruments: InstrumentRepository,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, RuntimeError> {
        let bus = EventBus::new();
        let persistence = PersistenceWorker::new((&config.persistence).into(), store.clone());
        let feeds = FeedManager::new(clock.clone());

        let mut risk = RiskPipeline::new(config.risk.clone());
        for strategy_cfg in &config.strategies {
            if let Some(budget) = &strategy_cfg.budget {
                risk = risk.with_strategy_override(strategy_cfg.id.clone(), budget.clone());
            }
        }
        let risk = Arc::new(risk);

        let mut orchestrator = Orchestrator::new(risk.clone(), instruments.clone());
        let mut venues: Vec<String> = Vec::new();
        let mut exit_engines = HashMap::new();
        let mut feed_keys: Vec<String> = Vec::new();

        for strategy_cfg in &config.strategies {
            let logic = build_strategy_logic(strategy_cfg)?;
            let runner =
                StrategyRunner::new(strategy_cfg.id.clone(), strategy_cfg.trade_symbol.clone(), logic);
            let policy = crate::strategy::intent::IntentPolicy {
                mode: config.execution.policy.mode,
                notional_usd: config.execution.policy.notional_usd,
                limit_offset_bps: config.execution.policy.limit_offset_bps,
                min_edge_bps: config.execution.policy.min_edge_bps,
                post_only: config.execution.policy.post_only,
                tif: config.execution.policy.tif,
                cooldown_ms: config.execution.policy.cooldown_ms,
                dedupe_window_ms: config.execution.policy.dedupe_window_ms,
                account: config.execution.account.clone(),
            };
            orchestrator.add_strategy(StrategySlot::new(
                runner,
                policy,
                strategy_cfg.primary_feed.clone(),
                strategy_cfg.mode,
            ));

            if !venues.contains(&strategy_cfg.primary_feed) {
                venues.push(strategy_cfg.primary_feed.clone());
            }
            feed_keys.push(format!("{}:{}", strategy_cfg.primary_feed, strategy_cfg.trade_symbol));
            for extra in &strategy_cfg.extra_feeds {
                if !venues.contains(extra) {
                    venues.push(extra.clone());
                }
                feed_keys.push(format!("{extra}:{}", strategy_cfg.trade_symbol));
            }

            let exit_config = strategy_cfg
                .exit
                .as_ref()
                .map(ExitConfig::from)
                .unwrap_or_else(default_exit_config);
            exit_engines.insert(strategy_cfg.id.clone(), ExitEngine::new(exit_config));
        }

        let mut adapters: HashMap<String, Arc<dyn ExecutionAdapter>> = HashMap::new();
        let mut policies: HashMap<String, Arc<ExecutionPolicy>> = HashMap::new();
        let mut reconcilers: HashMap<String, Arc<IntentReconciler>> = HashMap::new();
        let mut adapter_events = HashMap::new();
        for venue in &venues {
            let adapter = PaperAdapter::new(venue.clone(), instruments.clone());
            let events = adapter.events();
            adapter_events.insert(venue.clone(), events);
            adapters.insert(venue.clone(), Arc::new(adapter) as Arc<dyn ExecutionAdapter>);
            policies.insert(
                venue.clone(),
                ExecutionPolicy::new(venue.clone(), (&config.execution.reliability).into()),
            );
            reconcilers.insert(
                venue.clone(),
                IntentReconciler::new((&config.execution.reliability).into()),
            );
        }

        let mut feed_senders = HashMap::new();
        let mut feed_adapters = Vec::new();
        for key in dedupe_feed_keys(feed_keys) {
            let Some((venue, symbol)) = key.split_once(':') else {
                continue;
            };
            let handle = feeds.register(venue, symbol);
            let (channel_adapter, tx) = ChannelFeedAdapter::new(key.clone());
            feed_senders.insert(key, tx);
            feed_adapters.push((Arc::new(channel_adapter), handle));
        }

        // Recovery path (§4.2): fold the store's backlog into both projections before any live
        // subscription is registered, so replay and the live tail never race.
        let (account_state, _account_live) = AccountState::rebuild(store.as_ref());
        let account = Arc::new(account_state);
        for venue in &venues {
            for (asset, amount) in &config.accounting.seed_demo_balance {
                account.seed_demo_balance(venue, asset, *amount);
            }
        }
        let starting_cash: f64 = config.accounting.seed_demo_balance.values().sum();
        let portfolio_backlog = store.read(None, None, None).unwrap_or_default();
        let portfolio = Arc::new(PLMutex::new(PortfolioProjection::replay(
            &portfolio_backlog,
            starting_cash,
            250,
        )));

        let breach_monitor = Arc::new(RiskBreachMonitor::new(config.risk_breach));
        let telemetry = Arc::new(StrategyTelemetry::new());
        let metrics = Arc::new(Metrics::new());
        let ring_buffer = Arc::new(RingBuffer::new(10_000));
        let ready = Arc::new(AtomicBool::new(false));
        let degraded = Arc::new(DegradedFlags::default());
        let (shutdown_tx, _rx) = watch::channel(false);

        Ok(Arc::new(Self {
            config,
            clock,
            bus,
            store,
            persistence,
            feeds,
            instruments,
            risk,
            orchestrator: PLMutex::new(orchestrator),
            adapters,
            policies,
            reconcilers,
            feed_senders,
            feed_adapters: PLMutex::new(Some(feed_adapters)),
            adapter_events: PLMutex::new(Some(adapter_events)),
            account,
            portfolio,
            exit_engines: PLMutex::new(exit_engines),
            breach_monitor,
            telemetry,
            metrics,
            ring_buffer,
            ready,
            degraded,
            stale_seen: PLMutex::new(HashMap::new()),
            shutdown_tx,
        }))
    }

    /// Injects a tick as if it arrived from `venue`'s feed for `symbol`. The runtime only ever
    /// ingests through [`ChannelFeedAdapter`] instances registered at construction (§4.4); this
    /// is the one entry point for pushing data into them, used by paper runs and tests alike.
    pub fn ingest_tick(&self, venue: &str, symbol: &str, tick: Tick) -> bool {
        match self.feed_senders.get(&format!("{venue}:{symbol}")) {
            Some(tx) => tx.send(tick).is_ok(),
            None => false,
        }
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn record(self: &Arc<Self>, event: DomainEvent) {
        self.telemetry.apply(&event);
        self.ring_buffer.push(event.clone());
        self.bus.emit(event.clone());
        self.persistence.enqueue(event);
    }

    async fn submit_routed(self: &Arc<Self>, routed: RoutedIntent, now: DateTime<Utc>) {
        let RoutedIntent { venue, approved } = routed;
        let order = approved.order;

        self.record(DomainEvent::new(EventPayload::OrderNew(order.clone()), now));

        let (Some(policy), Some(adapter)) = (self.policies.get(&venue), self.adapters.get(&venue))
        else {
            warn!(venue = %venue, "no execution venue configured for routed intent");
            return;
        };
        if let Some(reconciler) = self.reconcilers.get(&venue) {
            reconciler.track_submitted(order.id, now);
        }

        self.metrics.incr_orders_submitted();
        if let Err(err) = policy.submit(adapter.as_ref(), &order).await {
            self.metrics.incr_execution_failures(&venue, err.to_string().as_str());
            self.degraded.execution.store(true, Ordering::Relaxed);
        }
        self.metrics
            .set_execution_circuit_state(&venue, policy.circuit_state().as_metric_value());
    }

    async fn route_exit_intent(
        self: &Arc<Self>,
        strategy: &StrategyConfig,
        mut intent: crate::strategy::intent::OrderIntent,
        pos: f64,
        now: DateTime<Utc>,
    ) {
        intent.qty = pos.abs();
        intent.account = self.config.execution.account.clone();
        if intent.qty <= 0.0 {
            return;
        }

        let ctx = RuntimeContext {
            account: self.account.clone(),
            portfolio: self.portfolio.clone(),
        };
        let (outcome, check) = {
            let orchestrator = self.orchestrator.lock();
            orchestrator.evaluate_intent(intent, strategy.primary_feed.clone(), &ctx, now)
        };
        self.record(DomainEvent::new(EventPayload::RiskCheck(check), now));

        match outcome {
            Ok(routed) => self.submit_routed(routed, now).await,
            Err(_rejected) => {
                self.metrics.incr_risk_rejected();
            }
        }
    }

    fn exposure(&self, positions: &[crate::portfolio::PositionSnapshot], symbol: &str) -> (f64, f64) {
        let portfolio = self.portfolio.lock();
        let mut symbol_notional = 0.0;
        let mut gross_notional = 0.0;
        for p in positions {
            let mark = portfolio.mark_price(&p.symbol).unwrap_or(p.avg_px);
            let notional = (p.pos * mark).abs();
            gross_notional += notional;
            if p.symbol == symbol {
                symbol_notional = notional;
            }
        }
        (symbol_notional, gross_notional)
    }

    async fn evaluate_exits(self: &Arc<Self>, tick: &Tick, now: DateTime<Utc>) {
        let Some(mark) = tick.mark() else { return };

        let snapshot = self.portfolio.lock().snapshot(now);
        let analytics = self.portfolio.lock().analytics(now);

        for strategy in &self.config.strategies {
            if strategy.trade_symbol != tick.symbol {
                continue;
            }
            let (pos, avg_px) = snapshot
                .positions
                .iter()
                .find(|p| p.symbol == strategy.trade_symbol)
                .map(|p| (p.pos, p.avg_px))
                .unwrap_or((0.0, 0.0));
            let (symbol_notional, gross_notional) = self.exposure(&snapshot.positions, &strategy.trade_symbol);

            let exit_intent = {
                let mut exit_engines = self.exit_engines.lock();
                let Some(engine) = exit_engines.get_mut(&strategy.id) else {
                    continue;
                };
                engine.on_position_change(&strategy.trade_symbol, pos, avg_px, now);
                engine.evaluate(
                    &strategy.id,
                    &strategy.trade_symbol,
                    mark,
                    now,
                    false,
                    None,
                    symbol_notional,
                    gross_notional,
                    analytics.drawdown_pct,
                    1.0,
                )
            };

            if let Some(intent) = exit_intent {
                self.route_exit_intent(strategy, intent, pos, now).await;
            }
        }
    }

    fn maybe_emit_portfolio(self: &Arc<Self>, now: DateTime<Utc>) {
        let emitted = self.portfolio.lock().maybe_emit(now);
        let Some(snapshot) = emitted else { return };

        self.metrics.set_portfolio_nav(snapshot.nav);
        self.record(DomainEvent::new(EventPayload::PortfolioSnapshot(snapshot), now));

        let analytics = self.portfolio.lock().analytics(now);
        if let Some(breach) = self.breach_monitor.evaluate(&analytics) {
            warn!(nav = breach.nav, drawdown = breach.drawdown, "risk breach: kill switch engaged");
        }
        self.record(DomainEvent::new(EventPayload::PnlAnalytics(analytics), now));
    }

    async fn handle_tick(self: &Arc<Self>, tick: Tick) {
        if !tick.is_valid() {
            return;
        }
        let now = self.clock.now();
        self.metrics.incr_ticks_ingested();
        self.record(DomainEvent::new(EventPayload::MarketTick(tick.clone()), now));

        if let Some(mark) = tick.mark() {
            self.portfolio.lock().update_mark(&tick.symbol, mark);
        }

        if !self.breach_monitor.kill_switch_engaged() {
            let ctx = RuntimeContext {
                account: self.account.clone(),
                portfolio: self.portfolio.clone(),
            };
            let outcome = {
                let mut orchestrator = self.orchestrator.lock();
                orchestrator.on_tick(&tick, &ctx, now)
            };

            for check in outcome.risk_checks {
                self.record(DomainEvent::new(EventPayload::RiskCheck(check), now));
            }
            for _rejected in outcome.rejected {
                self.metrics.incr_risk_rejected();
            }
            for routed in outcome.approved {
                self.submit_routed(routed, now).await;
            }

            self.evaluate_exits(&tick, now).await;
        }

        self.maybe_emit_portfolio(now);
    }

    async fn handle_adapter_event(self: &Arc<Self>, venue: &str, event: AdapterEvent) {
        let now = self.clock.now();
        match event {
            AdapterEvent::Ack(ack) => {
                if let Some(reconciler) = self.reconcilers.get(venue) {
                    reconciler.mark_acked(ack.order_id, now);
                }
                self.record(DomainEvent::new(EventPayload::OrderAck(ack), now));
            }
            AdapterEvent::Fill(fill) => {
                if let Some(reconciler) = self.reconcilers.get(venue) {
                    reconciler.mark_terminal(fill.order_id);
                }
                self.risk.reservations().release(fill.order_id);
                self.portfolio.lock().apply_fill(&fill);
                for adjustment in adjustments_for_fill(&fill, venue, &self.instruments) {
                    self.account.apply(&adjustment);
                    self.record(adjustment);
                }
                self.record(DomainEvent::new(EventPayload::OrderFill(fill), now));
            }
            AdapterEvent::Reject(reject) => {
                if let Some(reconciler) = self.reconcilers.get(venue) {
                    reconciler.mark_terminal(reject.order_id);
                }
                self.risk.reservations().release(reject.order_id);
                self.record(DomainEvent::new(EventPayload::OrderReject(reject), now));
            }
            AdapterEvent::Cancel(cancel) => {
                if let Some(reconciler) = self.reconcilers.get(venue) {
                    reconciler.mark_terminal(cancel.id);
                }
                self.risk.reservations().release(cancel.id);
                self.record(DomainEvent::new(EventPayload::OrderCancel(cancel), now));
            }
        }
    }

    async fn tick_loop(self: Arc<Self>, mut marks: broadcast::Receiver<Tick>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = marks.recv() => {
                    match received {
                        Ok(tick) => self.handle_tick(tick).await,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn adapter_event_loop(
        self: Arc<Self>,
        venue: String,
        mut events: mpsc::UnboundedReceiver<AdapterEvent>,
    ) {
        while let Some(event) = events.recv().await {
            self.handle_adapter_event(&venue, event).await;
        }
    }

    async fn reconciler_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval_ms = self.config.execution.reliability.reconciliation.poll_interval_ms.max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    for (venue, adapter) in &self.adapters {
                        let Some(reconciler) = self.reconcilers.get(venue) else { continue };
                        reconciler.tick(adapter.as_ref(), now).await;
                        self.metrics
                            .set_execution_pending_intents(venue, reconciler.pending_count() as u64);

                        let totals = (
                            reconciler.stale_ack.load(Ordering::Relaxed),
                            reconciler.stale_fill.load(Ordering::Relaxed),
                        );
                        let mut seen = self.stale_seen.lock();
                        let prev = *seen.get(venue).unwrap_or(&(0, 0));
                        for _ in 0..totals.0.saturating_sub(prev.0) {
                            self.metrics.incr_execution_stale_intents(venue, "ack-timeout");
                        }
                        for _ in 0..totals.1.saturating_sub(prev.1) {
                            self.metrics.incr_execution_stale_intents(venue, "fill-timeout");
                        }
                        seen.insert(venue.clone(), totals);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn feed_status_loop(
        self: Arc<Self>,
        mut status: broadcast::Receiver<(String, FeedStatus)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = status.recv() => {
                    match received {
                        Ok((key, status)) => {
                            let now = self.clock.now();
                            let (venue, symbol) = key.split_once(':').unwrap_or((key.as_str(), ""));
                            self.metrics.set_feed_status(venue, feed_status_code(status));
                            self.degraded
                                .feeds
                                .store(status == FeedStatus::Disconnected, Ordering::Relaxed);
                            self.record(DomainEvent::new(
                                EventPayload::FeedStatus(FeedStatusEvent {
                                    venue: venue.to_string(),
                                    symbol: symbol.to_string(),
                                    status,
                                    t: now,
                                }),
                                now,
                            ));
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn metrics_export_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (key, health) in self.feeds.health_snapshot() {
                        let venue = key.split(':').next().unwrap_or(&key);
                        self.metrics.set_feed_reconnects(venue, health.reconnects);
                        self.metrics.set_feed_tick_age(venue, health.age_seconds);
                    }
                    for (venue, policy) in &self.policies {
                        self.metrics
                            .set_execution_circuit_state(venue, policy.circuit_state().as_metric_value());
                    }
                    self.metrics
                        .set_persistence_queue_depth(self.persistence.queue_depth() as u64);
                    if self.persistence.is_degraded() {
                        self.degraded.persistence.store(true, Ordering::Relaxed);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    fn app_state(self: &Arc<Self>) -> AppState {
        AppState {
            ready: self.ready.clone(),
            degraded: self.degraded.clone(),
            portfolio: self.portfolio.clone(),
            account: self.account.clone(),
            telemetry: self.telemetry.clone(),
            metrics: self.metrics.clone(),
            ring_buffer: self.ring_buffer.clone(),
            store: self.store.clone(),
            breach_monitor: self.breach_monitor.clone(),
        }
    }

    /// Drives the runtime until the process receives a shutdown signal (Ctrl-C), then tears
    /// down in reverse build order: stop ingesting, cancel outstanding intents per venue, let
    /// the persistence worker drain, close the store (§5).
    pub async fn run(self: Arc<Self>) -> Result<(), RuntimeError> {
        for (channel_adapter, handle) in self
            .feed_adapters
            .lock()
            .take()
            .unwrap_or_default()
        {
            let hooks: Arc<dyn FeedLifecycleHooks> = Arc::new(FeedHookBridge { handle });
            tokio::spawn(async move { channel_adapter.connect(hooks).await });
        }

        for (venue, events) in self.adapter_events.lock().take().unwrap_or_default() {
            tokio::spawn(self.clone().adapter_event_loop(venue, events));
        }

        tokio::spawn(self.persistence.clone().run(self.shutdown_rx()));
        tokio::spawn(self.feeds.clone().spawn_sampler(self.shutdown_rx()));
        tokio::spawn(self.clone().tick_loop(self.feeds.marks(), self.shutdown_rx()));
        tokio::spawn(self.clone().reconciler_loop(self.shutdown_rx()));
        tokio::spawn(self.clone().feed_status_loop(self.feeds.status_stream(), self.shutdown_rx()));
        tokio::spawn(self.clone().metrics_export_loop(self.shutdown_rx()));

        self.ready.store(true, Ordering::Relaxed);
        info!(port = self.config.gateway.port, "control plane listening");

        let app = control_plane::router(self.app_state());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.gateway.port))
            .await
            .map_err(|e| RuntimeError::ConfigInvalid(e.to_string()))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|e| RuntimeError::ConfigInvalid(e.to_string()))?;

        self.shutdown().await;
        Ok(())
    }

    /// Reverse-build-order teardown (§5): signal every background task, force-cancel every
    /// outstanding intent per venue, then let the persistence worker's own shutdown drain run
    /// to completion before returning.
    pub async fn shutdown(self: &Arc<Self>) {
        let _ = self.shutdown_tx.send(true);

        for (venue, adapter) in &self.adapters {
            if let Some(reconciler) = self.reconcilers.get(venue) {
                reconciler.cancel_all_outstanding(adapter.as_ref()).await;
            }
        }

        tokio::time::sleep(Duration::from_millis(self.config.persistence.shutdown_drain_timeout_ms)).await;
    }
}
