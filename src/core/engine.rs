//! Pipeline engine
//!
//! The engine wires Feed -> FeatureWindow -> Strategy -> RiskManager ->
//! Broker -> PositionLedger and fans every step out on the event bus.
//!
//! # Activities
//!
//! `start()` connects the feed and spawns two tasks on a [`TaskTracker`]:
//!
//! - **feed**: pulls ticks and pushes them into a bounded mpsc queue. A full
//!   queue suspends the feed; ticks are never dropped. Feed errors are
//!   alerted, followed by a back-off and a reconnect.
//! - **pipeline**: owns the strategy, broker, ledger and risk manager and
//!   processes one tick at a time. Control commands are applied between
//!   ticks.
//!
//! Both tasks watch a broadcast shutdown channel and hand their owned state
//! back through their `JoinHandle`, so a stopped engine can be started again
//! with the same ledger and risk state. On shutdown the pipeline closes the
//! queue and keeps whatever was still in it, plus the tick the feed held,
//! as a backlog that is processed first after the next `start()`.
//!
//! # State machine
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::adapters::errors::TransportError;
use crate::adapters::traits::{Broker, Feed};
use crate::adapters::types::{Order, Tick};
use crate::config::constants::{feed_retry_delay, latency_window, order_timeout};
use crate::config::EngineConfig;
use crate::core::bus::SharedEventBus;
use crate::core::events::{Alert, AlertSource, Event};
use crate::core::features::FeatureWindow;
use crate::core::journal::{NoopJournal, SharedJournal};
use crate::core::ledger::{Position, PositionLedger};
use crate::core::metrics::{PerformanceMetrics, PerformanceTracker};
use crate::core::risk::{RiskLimits, RiskManager, RiskState};
use crate::core::strategy::{Strategy, StrategyError};
use crate::registry::{ActivePointer, ModelRegistry};

/// Control channel depth
const CONTROL_CAPACITY: usize = 32;

// =============================================================================
// Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Feed error: {0}")]
    Feed(#[from] TransportError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Invalid risk limits: {0}")]
    InvalidLimits(String),

    #[error("Engine task failed: {0}")]
    Task(String),

    /// A task died and took the pipeline state with it
    #[error("Engine state lost after a task failure")]
    StateLost,
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineStatus::Stopped => write!(f, "stopped"),
            EngineStatus::Starting => write!(f, "starting"),
            EngineStatus::Running => write!(f, "running"),
            EngineStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// External control operations, applied between ticks
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    ActivateKillSwitch,
    DeactivateKillSwitch,
    SetRiskLimits(RiskLimits),
    ResetDay,
    ConfigureStrategy(serde_json::Value),
}

struct ControlRequest {
    command: ControlCommand,
    reply: oneshot::Sender<Result<(), EngineError>>,
}

/// Read-only view of the pipeline, refreshed after every tick and command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    pub ticks_processed: u64,
    pub metrics: PerformanceMetrics,
    pub risk: Option<RiskState>,
    pub positions: Vec<Position>,
    pub cash: f64,
    pub strategy: String,
    pub loaded_artifact: Option<PathBuf>,
    pub loaded_version: Option<String>,
}

pub type SharedSnapshot = Arc<RwLock<EngineSnapshot>>;

// =============================================================================
// Pipeline state
// =============================================================================

/// Everything the pipeline activity owns
struct PipelineState<B, S> {
    broker: B,
    strategy: S,
    ledger: PositionLedger,
    risk: RiskManager,
    features: FeatureWindow,
    tracker: PerformanceTracker,
    ticks_processed: u64,
    /// Ticks pulled from the feed but not yet processed when the engine stopped
    backlog: VecDeque<Tick>,
    loaded_version: Option<String>,
    /// Active artifact whose reload failed; not retried until the pointer moves
    failed_artifact: Option<PathBuf>,
    registry_error_reported: bool,
}

/// Collaborators shared with the pipeline activity
#[derive(Clone)]
struct PipelineContext {
    bus: SharedEventBus,
    journal: SharedJournal,
    registry: Option<Arc<ModelRegistry>>,
    snapshot: SharedSnapshot,
    order_timeout: Duration,
    hot_reload: bool,
}

impl PipelineContext {
    fn alert(&self, source: AlertSource, reason: impl Into<String>, symbol: Option<&str>) {
        let mut alert = Alert::new(source, reason);
        if let Some(symbol) = symbol {
            alert = alert.for_symbol(symbol);
        }
        warn!(source = %alert.source, symbol = ?alert.symbol, reason = %alert.reason, "[ALERT]");
        self.bus.emit(Event::Alert(alert));
    }
}

impl<B: Broker, S: Strategy> PipelineState<B, S> {
    /// One full cycle for one tick
    async fn process_tick(&mut self, tick: Tick, ctx: &PipelineContext) {
        if let Err(e) = ctx.journal.record_tick(&tick).await {
            ctx.alert(AlertSource::Journal, format!("tick not journaled: {}", e), Some(tick.symbol.as_str()));
        }
        ctx.bus.emit(Event::Tick(tick.clone()));

        let mark = tick.mid();
        self.ledger.update_mark(&tick.symbol, mark);
        self.risk.update_mark(&tick.symbol, mark);
        self.ticks_processed += 1;

        if let Some(features) = self.features.update(&tick) {
            let position = self.ledger.position(&tick.symbol);
            match self.strategy.on_tick(&tick, &features, &position) {
                Ok(Some(order)) => self.execute(order, mark, ctx).await,
                Ok(None) => {}
                Err(e) => ctx.alert(AlertSource::Strategy, e.to_string(), Some(tick.symbol.as_str())),
            }
        }

        if ctx.hot_reload {
            self.check_reload(ctx).await;
        }
    }

    async fn execute(&mut self, order: Order, mark: f64, ctx: &PipelineContext) {
        let was_killed = self.risk.is_kill_switch_active();
        if let Err(e) = self.risk.check_order(&order, mark) {
            ctx.alert(
                AlertSource::Risk,
                format!("order {} rejected: {}", order.id, e),
                Some(order.symbol.as_str()),
            );
            self.report_kill_switch(was_killed, ctx);
            return;
        }

        let started = Instant::now();
        let fill = match tokio::time::timeout(ctx.order_timeout, self.broker.submit(&order)).await {
            Ok(Ok(fill)) => fill,
            Ok(Err(e)) => {
                ctx.alert(AlertSource::Broker, format!("order {} failed: {}", order.id, e), Some(order.symbol.as_str()));
                return;
            }
            Err(_) => {
                let e = TransportError::Timeout(ctx.order_timeout.as_millis() as u64);
                ctx.alert(AlertSource::Broker, format!("order {} failed: {}", order.id, e), Some(order.symbol.as_str()));
                return;
            }
        };
        let latency = started.elapsed();

        self.risk.update_fill(&fill);
        let outcome = self.ledger.apply_fill(&fill);
        let position = self.ledger.position(&fill.symbol);
        self.strategy.on_fill(&fill, &position);
        self.tracker.record_fill(outcome, latency);

        info!(
            order_id = %fill.order_id,
            symbol = %fill.symbol,
            side = %fill.side,
            size = fill.size,
            price = fill.price,
            fee = fill.fee,
            realized = %format!("{:.4}", outcome.realized),
            position = position.size,
            latency_ms = latency.as_millis() as u64,
            "[FILL] Applied"
        );

        if let Err(e) = ctx.journal.record_fill(&fill).await {
            ctx.alert(AlertSource::Journal, format!("fill not journaled: {}", e), Some(fill.symbol.as_str()));
        }
        ctx.bus.emit(Event::Fill(fill));
        ctx.bus.emit(Event::Metrics(self.metrics()));
        self.report_kill_switch(was_killed, ctx);
    }

    /// Alert once when the drawdown limit has just engaged the kill switch
    fn report_kill_switch(&self, was_active: bool, ctx: &PipelineContext) {
        if was_active || !self.risk.is_kill_switch_active() {
            return;
        }
        let state = self.risk.state();
        ctx.alert(
            AlertSource::Risk,
            format!(
                "kill switch engaged: drawdown {:.4} reached limit {:.4}",
                state.max_drawdown,
                self.risk.limits().max_daily_drawdown
            ),
            None,
        );
    }

    /// Swap the strategy's artifact when the registry's active pointer moved
    async fn check_reload(&mut self, ctx: &PipelineContext) {
        let Some(registry) = &ctx.registry else {
            return;
        };

        let pointer = match read_active_pointer(Arc::clone(registry)).await {
            Ok(Some(pointer)) => {
                self.registry_error_reported = false;
                pointer
            }
            Ok(None) => {
                self.registry_error_reported = false;
                return;
            }
            Err(reason) => {
                if !self.registry_error_reported {
                    self.registry_error_reported = true;
                    ctx.alert(AlertSource::Registry, format!("active model unreadable: {}", reason), None);
                }
                return;
            }
        };

        if self.strategy.loaded_artifact() == Some(pointer.artifact.as_path())
            || self.failed_artifact.as_ref() == Some(&pointer.artifact)
        {
            return;
        }

        match self.strategy.reload(&pointer.artifact) {
            Ok(()) => {
                info!(
                    version = %pointer.version,
                    artifact = %pointer.artifact.display(),
                    strategy = %self.strategy.name(),
                    "[RELOAD] Strategy reloaded"
                );
                self.failed_artifact = None;
                self.loaded_version = Some(pointer.version.clone());
                ctx.bus.emit(Event::ModelReloaded {
                    version: Some(pointer.version),
                    artifact: pointer.artifact,
                    timestamp: chrono::Utc::now(),
                });
            }
            Err(e) => {
                ctx.alert(
                    AlertSource::Registry,
                    format!("reload of {} failed, keeping current strategy: {}", pointer.version, e),
                    None,
                );
                self.failed_artifact = Some(pointer.artifact);
            }
        }
    }

    fn apply_control(&mut self, command: ControlCommand, ctx: &PipelineContext) -> Result<(), EngineError> {
        info!(command = ?command, "[CONTROL] Applying");
        match command {
            ControlCommand::ActivateKillSwitch => {
                if !self.risk.is_kill_switch_active() {
                    self.risk.activate_kill_switch();
                    ctx.alert(AlertSource::Risk, "kill switch activated by operator", None);
                }
            }
            ControlCommand::DeactivateKillSwitch => self.risk.deactivate_kill_switch(),
            ControlCommand::SetRiskLimits(limits) => {
                limits.validate().map_err(EngineError::InvalidLimits)?;
                self.risk.set_limits(limits);
            }
            ControlCommand::ResetDay => self.risk.reset_day(),
            ControlCommand::ConfigureStrategy(params) => self.strategy.configure(&params)?,
        }
        Ok(())
    }

    fn metrics(&self) -> PerformanceMetrics {
        self.tracker.snapshot(&self.ledger, self.risk.current_drawdown())
    }

    /// Refresh everything but the status
    fn fill_snapshot(&self, snapshot: &mut EngineSnapshot) {
        snapshot.ticks_processed = self.ticks_processed;
        snapshot.metrics = self.metrics();
        snapshot.risk = Some(self.risk.state());
        snapshot.positions = self.ledger.positions();
        snapshot.cash = self.ledger.cash();
        snapshot.strategy = self.strategy.name().to_string();
        snapshot.loaded_artifact = self.strategy.loaded_artifact().map(|p| p.to_path_buf());
        snapshot.loaded_version = self.loaded_version.clone();
    }
}

/// Read the active pointer on the blocking pool
async fn read_active_pointer(registry: Arc<ModelRegistry>) -> Result<Option<ActivePointer>, String> {
    match tokio::task::spawn_blocking(move || registry.active_model()).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

// =============================================================================
// Activities
// =============================================================================

/// Returns the feed and the tick it was holding if the queue closed under it
async fn run_feed<F: Feed>(
    mut feed: F,
    tick_tx: mpsc::Sender<Tick>,
    mut shutdown_rx: broadcast::Receiver<()>,
    bus: SharedEventBus,
    retry_delay: Duration,
) -> (F, Option<Tick>) {
    info!(feed = feed.feed_name(), "[FEED] Task started");
    let mut forwarded: u64 = 0;
    let mut unsent = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            next = feed.next_tick() => next,
        };

        match next {
            Ok(Some(tick)) => {
                // Wait for queue space rather than dropping the tick. The
                // pipeline closes the queue on shutdown, which hands it back.
                if let Err(mpsc::error::SendError(tick)) = tick_tx.send(tick).await {
                    unsent = Some(tick);
                    break;
                }
                forwarded += 1;
            }
            Ok(None) => {
                info!(feed = feed.feed_name(), forwarded, "[FEED] End of stream");
                break;
            }
            Err(e) => {
                let alert = Alert::new(AlertSource::Feed, format!("{} feed error: {}", feed.feed_name(), e));
                warn!(feed = feed.feed_name(), error = %e, "[FEED] Error, reconnecting after back-off");
                bus.emit(Event::Alert(alert));

                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
                if let Err(e) = feed.connect().await {
                    warn!(feed = feed.feed_name(), error = %e, "[FEED] Reconnect failed");
                }
            }
        }
    }

    info!(feed = feed.feed_name(), forwarded, "[FEED] Task stopped");
    (feed, unsent)
}

/// Next tick to process: the backlog first, then the queue
async fn next_tick(backlog: &mut VecDeque<Tick>, tick_rx: &mut mpsc::Receiver<Tick>) -> Option<Tick> {
    match backlog.pop_front() {
        Some(tick) => Some(tick),
        None => tick_rx.recv().await,
    }
}

async fn run_pipeline<B: Broker, S: Strategy>(
    mut state: PipelineState<B, S>,
    mut tick_rx: mpsc::Receiver<Tick>,
    mut control_rx: mpsc::Receiver<ControlRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
    ctx: PipelineContext,
) -> PipelineState<B, S> {
    info!(strategy = %state.strategy.name(), backlog = state.backlog.len(), "[PIPELINE] Task started");
    let mut backlog = std::mem::take(&mut state.backlog);
    let mut feed_open = true;

    loop {
        // Work runs inside the branch bodies, so shutdown is only observed
        // between cycles and an in-flight fill always completes.
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            Some(request) = control_rx.recv() => {
                let result = state.apply_control(request.command, &ctx);
                let mut snapshot = ctx.snapshot.write().await;
                state.fill_snapshot(&mut snapshot);
                let _ = request.reply.send(result);
            }
            next = next_tick(&mut backlog, &mut tick_rx), if feed_open || !backlog.is_empty() => match next {
                Some(tick) => {
                    state.process_tick(tick, &ctx).await;
                    let mut snapshot = ctx.snapshot.write().await;
                    state.fill_snapshot(&mut snapshot);
                }
                None => {
                    debug!("[PIPELINE] Tick queue closed");
                    feed_open = false;
                }
            },
        }
    }

    // Keep what the feed already handed over for the next run
    tick_rx.close();
    while let Some(tick) = tick_rx.recv().await {
        backlog.push_back(tick);
    }
    state.backlog = backlog;

    info!(ticks = state.ticks_processed, backlog = state.backlog.len(), "[PIPELINE] Task stopped");
    state
}

// =============================================================================
// Engine
// =============================================================================

struct Running<F, B, S> {
    shutdown_tx: broadcast::Sender<()>,
    control_tx: mpsc::Sender<ControlRequest>,
    tasks: TaskTracker,
    feed: JoinHandle<(F, Option<Tick>)>,
    pipeline: JoinHandle<PipelineState<B, S>>,
}

/// Orchestrates one feed, one broker and one strategy
pub struct Engine<F, B, S> {
    config: EngineConfig,
    bus: SharedEventBus,
    journal: SharedJournal,
    registry: Option<Arc<ModelRegistry>>,
    snapshot: SharedSnapshot,
    order_timeout: Duration,
    feed_retry_delay: Duration,
    idle: Option<(F, PipelineState<B, S>)>,
    running: Option<Running<F, B, S>>,
}

impl<F: Feed, B: Broker, S: Strategy> Engine<F, B, S> {
    /// Build a stopped engine
    ///
    /// Timeouts and the latency window default to `ORDER_TIMEOUT_MS`,
    /// `FEED_RETRY_DELAY_MS` and `LATENCY_WINDOW`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        feed: F,
        broker: B,
        strategy: S,
        limits: RiskLimits,
        starting_cash: f64,
        bus: SharedEventBus,
    ) -> Self {
        let state = PipelineState {
            broker,
            strategy,
            ledger: PositionLedger::new(starting_cash),
            risk: RiskManager::new(limits, starting_cash),
            features: FeatureWindow::new(config.feature_window, config.min_history),
            tracker: PerformanceTracker::new(starting_cash, latency_window()),
            ticks_processed: 0,
            backlog: VecDeque::new(),
            loaded_version: None,
            failed_artifact: None,
            registry_error_reported: false,
        };
        let mut snapshot = EngineSnapshot::default();
        state.fill_snapshot(&mut snapshot);

        Self {
            config,
            bus,
            journal: Arc::new(NoopJournal),
            registry: None,
            snapshot: Arc::new(RwLock::new(snapshot)),
            order_timeout: order_timeout(),
            feed_retry_delay: feed_retry_delay(),
            idle: Some((feed, state)),
            running: None,
        }
    }

    /// Hot-reload the strategy from this registry's active pointer
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_journal(mut self, journal: SharedJournal) -> Self {
        self.journal = journal;
        self
    }

    pub fn with_order_timeout(mut self, timeout: Duration) -> Self {
        self.order_timeout = timeout;
        self
    }

    pub fn with_feed_retry_delay(mut self, delay: Duration) -> Self {
        self.feed_retry_delay = delay;
        self
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub async fn status(&self) -> EngineStatus {
        self.snapshot.read().await.status
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Handle for readers in other tasks
    pub fn shared_snapshot(&self) -> SharedSnapshot {
        Arc::clone(&self.snapshot)
    }

    async fn set_status(&self, status: EngineStatus) {
        self.snapshot.write().await.status = status;
        debug!(status = %status, "[ENGINE] Status");
    }

    fn context(&self) -> PipelineContext {
        PipelineContext {
            bus: Arc::clone(&self.bus),
            journal: Arc::clone(&self.journal),
            registry: self.registry.clone(),
            snapshot: Arc::clone(&self.snapshot),
            order_timeout: self.order_timeout,
            hot_reload: self.config.hot_reload,
        }
    }

    /// Connect the feed and launch both activities (no-op when running)
    pub async fn start(&mut self) -> Result<(), EngineError> {
        if self.running.is_some() {
            debug!("[ENGINE] Start ignored: already running");
            return Ok(());
        }
        let Some((mut feed, mut state)) = self.idle.take() else {
            return Err(EngineError::StateLost);
        };

        self.set_status(EngineStatus::Starting).await;
        if let Err(e) = feed.connect().await {
            error!(feed = feed.feed_name(), error = %e, "[ENGINE] Feed connection failed");
            self.idle = Some((feed, state));
            self.set_status(EngineStatus::Stopped).await;
            return Err(EngineError::Feed(e));
        }

        let ctx = self.context();
        if ctx.hot_reload {
            state.check_reload(&ctx).await;
        }
        {
            let mut snapshot = self.snapshot.write().await;
            state.fill_snapshot(&mut snapshot);
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (tick_tx, tick_rx) = mpsc::channel(self.config.tick_queue_capacity.max(1));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);

        let tasks = TaskTracker::new();
        let feed_handle = tasks.spawn(run_feed(
            feed,
            tick_tx,
            shutdown_tx.subscribe(),
            Arc::clone(&self.bus),
            self.feed_retry_delay,
        ));
        let pipeline_handle = tasks.spawn(run_pipeline(
            state,
            tick_rx,
            control_rx,
            shutdown_tx.subscribe(),
            ctx,
        ));
        tasks.close();

        self.running = Some(Running {
            shutdown_tx,
            control_tx,
            tasks,
            feed: feed_handle,
            pipeline: pipeline_handle,
        });
        self.set_status(EngineStatus::Running).await;
        info!(
            queue = self.config.tick_queue_capacity,
            order_timeout_ms = self.order_timeout.as_millis() as u64,
            hot_reload = self.config.hot_reload,
            "[ENGINE] Started"
        );
        Ok(())
    }

    /// Cancel both activities, wait for them, then disconnect the feed
    /// (no-op when stopped)
    pub async fn stop(&mut self) -> Result<(), EngineError> {
        let Some(running) = self.running.take() else {
            debug!("[ENGINE] Stop ignored: not running");
            return Ok(());
        };

        self.set_status(EngineStatus::Stopping).await;
        info!("[SHUTDOWN] Stopping engine");
        let _ = running.shutdown_tx.send(());
        running.tasks.wait().await;

        let feed = running.feed.await;
        let pipeline = running.pipeline.await;
        let (mut feed, state) = match (feed, pipeline) {
            (Ok((feed, unsent)), Ok(mut state)) => {
                state.backlog.extend(unsent);
                (feed, state)
            }
            (feed, pipeline) => {
                let reason = [feed.err(), pipeline.err()]
                    .into_iter()
                    .flatten()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                error!(reason = %reason, "[SHUTDOWN] Engine task failed");
                self.set_status(EngineStatus::Stopped).await;
                return Err(EngineError::Task(reason));
            }
        };

        if let Err(e) = state.broker.cancel_all().await {
            warn!(broker = state.broker.broker_name(), error = %e, "[SHUTDOWN] cancel_all failed");
        }
        if let Err(e) = feed.disconnect().await {
            warn!(feed = feed.feed_name(), error = %e, "[SHUTDOWN] Feed disconnect failed");
        }

        {
            let mut snapshot = self.snapshot.write().await;
            state.fill_snapshot(&mut snapshot);
        }
        let backlog = state.backlog.len();
        self.idle = Some((feed, state));
        self.set_status(EngineStatus::Stopped).await;
        info!(backlog, "[SHUTDOWN] Engine stopped");
        Ok(())
    }

    /// Apply a control command; waits until the pipeline has applied it
    pub async fn control(&mut self, command: ControlCommand) -> Result<(), EngineError> {
        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            running
                .control_tx
                .send(ControlRequest { command, reply })
                .await
                .map_err(|_| EngineError::Task("pipeline is not accepting commands".to_string()))?;
            return rx
                .await
                .map_err(|_| EngineError::Task("pipeline dropped the command".to_string()))?;
        }

        let ctx = self.context();
        let (_, state) = self.idle.as_mut().ok_or(EngineError::StateLost)?;
        let result = state.apply_control(command, &ctx);
        let mut snapshot = self.snapshot.write().await;
        state.fill_snapshot(&mut snapshot);
        result
    }

    pub async fn activate_kill_switch(&mut self) -> Result<(), EngineError> {
        self.control(ControlCommand::ActivateKillSwitch).await
    }

    pub async fn deactivate_kill_switch(&mut self) -> Result<(), EngineError> {
        self.control(ControlCommand::DeactivateKillSwitch).await
    }

    pub async fn set_risk_limits(&mut self, limits: RiskLimits) -> Result<(), EngineError> {
        self.control(ControlCommand::SetRiskLimits(limits)).await
    }

    pub async fn reset_day(&mut self) -> Result<(), EngineError> {
        self.control(ControlCommand::ResetDay).await
    }

    pub async fn configure_strategy(&mut self, params: serde_json::Value) -> Result<(), EngineError> {
        self.control(ControlCommand::ConfigureStrategy(params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{PaperBroker, StreamFeed};
    use crate::core::bus::EventBus;
    use crate::core::events::TOPIC_ALERTS;
    use crate::core::strategy::MomentumStrategy;
    use tokio::time::timeout;

    fn engine(feed: StreamFeed) -> Engine<StreamFeed, PaperBroker, MomentumStrategy> {
        Engine::new(
            EngineConfig {
                tick_queue_capacity: 4,
                feature_window: 5,
                min_history: 2,
                hot_reload: false,
            },
            feed,
            PaperBroker::new(0.0),
            MomentumStrategy::default(),
            RiskLimits::default(),
            10_000.0,
            EventBus::default().into_shared(),
        )
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let mut engine = engine(StreamFeed::from_ticks(vec![]));
        assert_eq!(engine.status().await, EngineStatus::Stopped);

        engine.stop().await.unwrap();
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Running);
        assert!(engine.is_running());

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert_eq!(engine.status().await, EngineStatus::Stopped);

        // Restartable with the same state
        engine.start().await.unwrap();
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_control_while_stopped_applies_directly() {
        let mut engine = engine(StreamFeed::from_ticks(vec![]));
        engine.activate_kill_switch().await.unwrap();
        assert!(engine.snapshot().await.risk.unwrap().kill_switch);

        engine.deactivate_kill_switch().await.unwrap();
        assert!(!engine.snapshot().await.risk.unwrap().kill_switch);

        let bad = RiskLimits {
            max_position: -1.0,
            ..RiskLimits::default()
        };
        assert!(matches!(
            engine.set_risk_limits(bad).await,
            Err(EngineError::InvalidLimits(_))
        ));
        assert!(matches!(
            engine.configure_strategy(serde_json::json!({"nope": 1})).await,
            Err(EngineError::Strategy(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_switch_alert_on_operator_activation() {
        let mut engine = engine(StreamFeed::from_ticks(vec![]));
        let alerts = engine.bus().subscribe(TOPIC_ALERTS);

        engine.start().await.unwrap();
        engine.activate_kill_switch().await.unwrap();
        engine.activate_kill_switch().await.unwrap();

        let alert = timeout(Duration::from_secs(1), alerts.recv()).await.unwrap().unwrap();
        assert_eq!(alert.as_alert().unwrap().source, AlertSource::Risk);
        // Second activation is a no-op
        assert!(alerts.try_recv().is_none());
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_active_pointer_read_off_runtime() {
        let models = tempfile::TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::open(models.path(), 5).unwrap());
        assert_eq!(read_active_pointer(Arc::clone(&registry)).await, Ok(None));

        let scratch = tempfile::TempDir::new().unwrap();
        let artifact = scratch.path().join("seed.json");
        std::fs::write(&artifact, "{}").unwrap();
        let version = registry
            .register_version(&artifact, crate::registry::ModelMetadata::default())
            .unwrap()
            .version;
        registry.activate(&version).unwrap();

        let pointer = read_active_pointer(Arc::clone(&registry)).await.unwrap().unwrap();
        assert_eq!(pointer.version, version);
        assert!(pointer.artifact.exists());

        // A corrupt pointer surfaces as an error instead of blocking the pipeline
        std::fs::write(registry.base_dir().join("active"), "not json").unwrap();
        assert!(read_active_pointer(registry).await.is_err());
    }

    #[tokio::test]
    async fn test_ticks_flow_through_pipeline() {
        let ticks: Vec<Tick> = (0..5)
            .map(|i| Tick::new("BTC-USD", 99.0 + i as f64, 101.0 + i as f64, 100.0, 1.0))
            .collect();
        let mut engine = engine(StreamFeed::from_ticks(ticks));
        engine.start().await.unwrap();

        timeout(Duration::from_secs(2), async {
            while engine.snapshot().await.ticks_processed < 5 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        engine.stop().await.unwrap();
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.status, EngineStatus::Stopped);
        assert_eq!(snapshot.ticks_processed, 5);
        assert_eq!(snapshot.strategy, "momentum");
        // Rising mids: momentum strategy went long
        assert!(snapshot.metrics.trades >= 1);
        assert!(snapshot.positions.iter().any(|p| p.size > 0.0));
    }
}
