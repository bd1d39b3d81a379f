//! polycore paper session
//!
//! Drives the tick engine against synthetic binary markets and the paper
//! executor. Stops on Ctrl-C or after `bot.max_ticks` ticks.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use polycore::config::AppConfig;
use polycore::demo::{EdgeDetector, SyntheticMarket};
use polycore::engine::{
    CsvTradeJournal, FeedWatchdog, FileJournal, JournalSet, NoopWatchdog, TickEngine,
};
use polycore::execution::PaperExecutor;
use polycore::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(config.bot.json_logs)?;

    info!("🚀 polycore {} starting (paper)", config.bot.tag);
    info!("⚙️ {}", config);

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut market = SyntheticMarket::new(&config.demo, now_ms);
    let detector = EdgeDetector::new(market.listing(), &config.demo);
    let paper = Arc::new(PaperExecutor::new(config.paper.clone()).with_fee_model(config.fees));

    let guards = config.guard_pipeline()?;
    let exits = config.exit_pipeline()?;
    info!(guards = %guards.describe(), exits = %exits.describe(), "Pipelines configured");

    let mut engine = TickEngine::new(config.engine_config(), paper.clone(), detector)
        .context("Failed to build engine")?
        .with_guards(guards)
        .with_exits(exits);

    let feed_watchdog = (config.engine.stale_after_ms > 0)
        .then(|| Arc::new(FeedWatchdog::new(config.engine.stale_after_ms)));
    engine = match &feed_watchdog {
        Some(watchdog) => engine.with_watchdog(watchdog.clone()),
        None => engine.with_watchdog(NoopWatchdog),
    };

    let data_dir = Path::new(&config.persistence.data_dir);
    let mut journals = JournalSet::new();
    if config.persistence.journal_enabled {
        let path = data_dir.join("journal.jsonl");
        journals = journals.with(FileJournal::open(&path).await?);
        info!("💾 Journal: {}", path.display());
    }
    if config.persistence.csv_enabled {
        let path = data_dir.join("trades.csv");
        journals = journals.with(CsvTradeJournal::open(&path)?);
        info!("💾 Trades CSV: {}", path.display());
    }
    let engine = Arc::new(engine.with_journal(journals));

    let mut events = engine.subscribe();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event = event.name(), payload = %json, "Engine event"),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event listener lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut interval =
        tokio::time::interval(Duration::from_millis(config.bot.tick_interval_ms.max(1)));
    let mut ticks: u64 = 0;
    let mut realized_pnl = 0.0;
    let mut trades = 0usize;
    let mut wins = 0usize;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Ctrl-C received, stopping");
                break;
            }
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let book = engine.positions().await;
        let ctx = market
            .step(now_ms)
            .with_balance(paper.balance())
            .with_exposure(book.exposure())
            .with_daily_pnl(realized_pnl);
        if let Some(watchdog) = &feed_watchdog {
            watchdog.record_update();
        }

        let report = engine.tick(ctx).await;
        ticks += 1;
        for (closed, _) in &report.closed {
            realized_pnl += closed.net_pnl;
            trades += 1;
            if closed.net_pnl > 0.0 {
                wins += 1;
            }
        }
        if report.diagnostics.iter().any(|d| d.is_fatal()) {
            error!("Fatal diagnostic reported, closing only");
            engine.closing_only();
        }

        if config.bot.max_ticks > 0 && ticks >= config.bot.max_ticks {
            info!(ticks = ticks, "Tick limit reached");
            break;
        }
    }

    engine.stop();
    let open = engine.positions().await.len();
    engine.shutdown();
    drop(engine);
    if let Err(e) = event_task.await {
        warn!(error = %e, "Event listener ended abnormally");
    }

    let win_rate = if trades > 0 {
        wins as f64 / trades as f64 * 100.0
    } else {
        0.0
    };
    info!("📊 ═══════════════════════════════════════");
    info!("📊 Session summary");
    info!("📊 Ticks: {} | Trades: {} | Win rate: {:.1}%", ticks, trades, win_rate);
    info!("📊 Realized PnL: ${:+.2} | Balance: ${:.2}", realized_pnl, paper.balance());
    info!("📊 Positions left open: {}", open);
    info!("📊 ═══════════════════════════════════════");
    Ok(())
}
