//! Run command implementation
//!
//! Wires the decision loop to its collaborators and drives it on a fixed
//! period until Ctrl+C. Stopping cancels new ticks but never abandons
//! pending trades: every scheduled settlement is drained into the ledger
//! before the process exits.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use ai_binary_trader::analyzer::SignalAnalyzer;
use ai_binary_trader::bot::{DecisionLoop, TickOutcome};
use ai_binary_trader::broker::{Broker, PaperBroker};
use ai_binary_trader::engine::TradingEngine;
use ai_binary_trader::inference::{GeminiClient, Inference, OfflineInference};
use ai_binary_trader::market::SimulatedFeed;
use ai_binary_trader::state_manager::StateStore;
use ai_binary_trader::{AccountKind, Config};

/// Pause between drain passes when the earliest entry is already overdue,
/// which happens when its broker resolution keeps failing.
const DRAIN_RETRY_DELAY: Duration = Duration::from_secs(2);

pub fn run(
    config_path: String,
    paper: bool,
    live: bool,
    interval_secs: u64,
    state_db: Option<String>,
) -> Result<()> {
    if !paper && !live {
        bail!("Must specify either --paper or --live mode");
    }
    if live {
        bail!("Live brokerage transport is not wired in; run with --paper");
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(config_path, interval_secs, state_db))
}

async fn run_async(
    config_path: String,
    interval_secs: u64,
    state_db: Option<String>,
) -> Result<()> {
    info!("Starting trading bot (paper mode)");

    let config = Config::from_file(&config_path).context("Failed to load configuration")?;
    info!(
        "Settings: max_stake={} threshold={}% max_losses={} duration={}m",
        config.trading.max_stake,
        config.trading.confidence_threshold,
        config.trading.max_consecutive_losses,
        config.trading.trade_duration_minutes,
    );

    let db_path = state_db.unwrap_or_else(|| config.state.db_path.clone());
    let store = StateStore::new(&db_path)?;
    info!("State store: {db_path}");

    let broker = Arc::new(PaperBroker::new());

    let inference: Arc<dyn Inference> = match GeminiClient::new(&config.inference) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!("Inference disabled ({e:#}); running on fallback signals only");
            Arc::new(OfflineInference)
        }
    };
    let analyzer = SignalAnalyzer::new(inference);

    let mut engine = TradingEngine::new();
    let accounts = broker.list_accounts().await?;
    let account = accounts
        .iter()
        .find(|a| a.kind == AccountKind::Demo)
        .cloned()
        .context("No demo account available")?;
    engine.select_account(account);

    if let Some((stats, streak)) = store.load_checkpoint()? {
        info!(
            "Resuming ledger: {} trades, win rate {:.1}%, balance {}",
            stats.total_trades,
            stats.win_rate * 100.0,
            stats.balance
        );
        engine.restore_stats(stats, streak);
    }
    // id sequence must continue past the audit trail or resumed sessions
    // would overwrite earlier rows
    if let Some(last_id) = store.last_trade_id()? {
        engine.resume_trade_ids(last_id);
    }

    let mut bot = DecisionLoop::new(
        config.trading.clone(),
        Arc::new(SimulatedFeed::new()),
        analyzer,
        broker.clone(),
        engine,
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Decision cycle every {interval_secs}s; Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_settlements(&mut bot, &store, &broker).await?;

                match bot.tick(Utc::now()).await {
                    Ok(TickOutcome::Opened(id)) => info!("Cycle opened {id}"),
                    Ok(TickOutcome::Rejected(_)) | Ok(TickOutcome::NoAccount) => {}
                    Err(e) => warn!("Cycle failed: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stop requested; no new cycles will start");
                break;
            }
        }
    }

    // Pending trades still settle after the bot stops, so the ledger never
    // loses P&L to a shutdown. A failed resolution stays queued with its
    // past due time, so waits are floored to keep the drain from spinning.
    loop {
        flush_settlements(&mut bot, &store, &broker).await?;
        if bot.unsettled_count() == 0 {
            break;
        }
        // to_std() fails for past due times, which maps them to the delay
        let wait = bot
            .next_settlement_due()
            .and_then(|due| (due - Utc::now()).to_std().ok())
            .unwrap_or(DRAIN_RETRY_DELAY);
        info!(
            "Draining {} pending settlement(s), next pass in {}s",
            bot.unsettled_count(),
            wait.as_secs()
        );
        tokio::time::sleep(wait).await;
    }

    let stats = bot.engine().stats();
    store.save_checkpoint(stats, bot.engine().consecutive_losses())?;
    info!(
        "Stopped. {} trades | {} wins / {} losses | win rate {:.1}% | total PnL {} | balance {}",
        stats.total_trades,
        stats.wins,
        stats.losses,
        stats.win_rate * 100.0,
        stats.total_pnl,
        stats.balance
    );

    Ok(())
}

/// Settle everything due now, persist the results, and nudge the simulated
/// win probability toward the running rate.
async fn flush_settlements(
    bot: &mut DecisionLoop,
    store: &StateStore,
    broker: &PaperBroker,
) -> Result<()> {
    let settled = bot.settle_due(Utc::now()).await;
    if settled.is_empty() {
        return Ok(());
    }

    for (id, _) in &settled {
        if let Some(trade) = bot.engine().trade(*id) {
            store.record_trade(trade)?;
        }
    }

    let stats = bot.engine().stats().clone();
    store.save_checkpoint(&stats, bot.engine().consecutive_losses())?;

    if stats.total_trades > 0 {
        broker.set_win_probability(stats.win_rate + 0.05);
    }

    Ok(())
}
