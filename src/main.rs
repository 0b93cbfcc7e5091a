//! Trading pipeline - paper trading entry point
//!
//! 1. Loads `.env` and the YAML configuration (`CONFIG_PATH`, default `config.yaml`)
//! 2. Opens the model registry and the optional trade journal
//! 3. Runs the engine against a synthetic feed and the paper broker
//! 4. Logs alerts, metrics and model reloads until Ctrl+C

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use trading_pipeline::adapters::{PaperBroker, RandomWalkFeed};
use trading_pipeline::config::{self, constants, logging};
use trading_pipeline::core::{
    log_event, Engine, EventBus, JsonlJournal, NoopJournal, SharedEventBus, SharedJournal,
    StrategyKind, TOPIC_ALERTS, TOPIC_METRICS, TOPIC_MODELS,
};
use trading_pipeline::registry::ModelRegistry;

/// Forward operator-facing topics to the log until shutdown
async fn event_logger(bus: SharedEventBus, mut shutdown_rx: broadcast::Receiver<()>) {
    let alerts = bus.subscribe(TOPIC_ALERTS);
    let metrics = bus.subscribe(TOPIC_METRICS);
    let models = bus.subscribe(TOPIC_MODELS);

    loop {
        let event = tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(event) = alerts.recv() => event,
            Some(event) = metrics.recv() => event,
            Some(event) = models.recv() => event,
            else => break,
        };
        log_event(&event);
    }

    let dropped = alerts.dropped() + metrics.dropped() + models.dropped();
    info!(dropped, "[SHUTDOWN] Event logger stopped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();
    logging::init_logging();

    info!("Trading pipeline starting");
    constants::log_configuration();

    let config_path = PathBuf::from(
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()),
    );
    info!(path = %config_path.display(), "[CONFIG] Loading configuration");
    let config = match config::load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "[CONFIG] Configuration failed");
            std::process::exit(1);
        }
    };
    info!(
        symbol = %config.paper.symbol,
        strategy = %config.strategy.kind,
        starting_cash = config.account.starting_cash,
        max_position = config.risk.max_position,
        max_notional = config.risk.max_notional,
        max_daily_drawdown = config.risk.max_daily_drawdown,
        "[CONFIG] Loaded"
    );

    let bus = EventBus::new(config.bus.capacity, config.bus.policy).into_shared();
    let registry = Arc::new(ModelRegistry::open(
        &config.registry.base_dir,
        config.registry.keep_last,
    )?);
    let journal: SharedJournal = match &config.journal.path {
        Some(path) => Arc::new(JsonlJournal::open(path).await?),
        None => Arc::new(NoopJournal),
    };

    let paper = &config.paper;
    let mut feed = RandomWalkFeed::new(
        paper.symbol.clone(),
        paper.start_price,
        paper.step,
        Duration::from_millis(paper.interval_ms),
    );
    if let Some(seed) = paper.seed {
        feed = feed.with_seed(seed);
    }
    let broker = PaperBroker::new(paper.fee_rate)
        .with_slippage_bps(paper.slippage_bps)
        .with_latency(Duration::from_millis(paper.latency_ms));
    let strategy = StrategyKind::from_config(&config.strategy)?;

    let mut engine = Engine::new(
        config.engine.clone(),
        feed,
        broker,
        strategy,
        config.risk.clone(),
        config.account.starting_cash,
        Arc::clone(&bus),
    )
    .with_registry(registry)
    .with_journal(journal);

    // Create shutdown broadcast channel
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let logger = tokio::spawn(event_logger(Arc::clone(&bus), shutdown_tx.subscribe()));

    // Spawn SIGINT handler task
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("[SHUTDOWN] Graceful shutdown initiated");
                let _ = shutdown_signal.send(());
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for Ctrl+C signal");
            }
        }
    });

    engine.start().await?;
    info!("Engine running. Press Ctrl+C to stop.");

    let _ = shutdown_rx.recv().await;

    engine.stop().await?;
    let snapshot = engine.snapshot().await;
    info!(
        ticks = snapshot.ticks_processed,
        trades = snapshot.metrics.trades,
        total_pnl = %format!("{:.2}", snapshot.metrics.total_pnl),
        win_rate = %format!("{:.2}", snapshot.metrics.win_rate),
        max_drawdown = snapshot.risk.as_ref().map(|r| r.max_drawdown).unwrap_or(0.0),
        "[SHUTDOWN] Final snapshot"
    );

    if let Err(e) = logger.await {
        error!(error = %e, "[SHUTDOWN] Event logger task failed");
    }
    info!("[SHUTDOWN] Clean exit");
    Ok(())
}
