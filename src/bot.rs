//! Decision loop
//!
//! Per-tick orchestration: snapshot -> signal -> governance -> stake ->
//! contract submission -> scheduled settlement. Each tick is independent;
//! the loop never waits for an earlier trade to settle, so several trades
//! may be pending at once and may settle out of creation order.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::analyzer::SignalAnalyzer;
use crate::broker::Broker;
use crate::config::TradingSettings;
use crate::engine::TradingEngine;
use crate::governor::{Decision, RejectReason, TradingGovernor};
use crate::market::MarketData;
use crate::risk::RiskSizer;
use crate::scheduler::SettlementQueue;
use crate::{Outcome, TradeId};

/// Result of one decision cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No account selected; no collaborator was consulted.
    NoAccount,
    /// The governor declined the cycle.
    Rejected(RejectReason),
    /// A trade was opened and its settlement scheduled.
    Opened(TradeId),
}

/// The decision-and-risk loop
pub struct DecisionLoop {
    settings: TradingSettings,
    market: Arc<dyn MarketData>,
    analyzer: SignalAnalyzer,
    governor: TradingGovernor,
    sizer: RiskSizer,
    broker: Arc<dyn Broker>,
    engine: TradingEngine,
    queue: SettlementQueue,
}

impl DecisionLoop {
    pub fn new(
        settings: TradingSettings,
        market: Arc<dyn MarketData>,
        analyzer: SignalAnalyzer,
        broker: Arc<dyn Broker>,
        engine: TradingEngine,
    ) -> Self {
        DecisionLoop {
            settings,
            market,
            analyzer,
            governor: TradingGovernor::new(),
            sizer: RiskSizer::new(),
            broker,
            engine,
            queue: SettlementQueue::new(),
        }
    }

    pub fn engine(&self) -> &TradingEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TradingEngine {
        &mut self.engine
    }

    pub fn settings(&self) -> &TradingSettings {
        &self.settings
    }

    /// Fire time of the next scheduled settlement, if any.
    pub fn next_settlement_due(&self) -> Option<DateTime<Utc>> {
        self.queue.next_due()
    }

    pub fn unsettled_count(&self) -> usize {
        self.queue.len()
    }

    /// Run one decision cycle at time `now`.
    ///
    /// Ledger reads (win rate, balance, loss counter) are taken once at the
    /// start of the cycle; nothing mutates them until settlement.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome> {
        if self.engine.selected_account().is_none() {
            warn!("No account selected; skipping cycle");
            return Ok(TickOutcome::NoAccount);
        }

        let win_rate = self.engine.stats().win_rate;
        let balance = self.engine.stats().balance;
        let consecutive_losses = self.engine.consecutive_losses();
        let has_history = self.engine.stats().total_trades > 0;

        let snapshot = self
            .market
            .snapshot()
            .await
            .context("Failed to fetch market snapshot")?;
        info!("{} @ ${:.4}", snapshot.symbol, snapshot.current_price);

        let analysis = self.analyzer.analyze(&snapshot, &self.settings).await;
        let signal = analysis.signal().clone();
        info!(
            "Confidence: {}% | Risk: {} | Direction: {}",
            signal.confidence, signal.risk_level, signal.direction
        );

        // Governance before any stake computation
        match self.governor.approve(&signal, consecutive_losses, &self.settings) {
            Decision::Rejected(reason) => {
                info!("Skipping cycle: {reason}");
                return Ok(TickOutcome::Rejected(reason));
            }
            Decision::Approved => {}
        }

        // An empty history says nothing about edge; size against a coin flip
        // instead of the degenerate zero-rate path.
        let sizing_win_rate = if has_history { win_rate } else { 0.5 };
        let stake = self
            .sizer
            .size(signal.confidence, sizing_win_rate, balance, &self.settings);

        let contract = self
            .broker
            .submit_contract(
                &snapshot.symbol,
                signal.direction,
                stake,
                self.settings.trade_duration_minutes,
            )
            .await
            .context("Failed to submit contract")?;

        let trade_id = self.engine.open_trade(
            snapshot.symbol.clone(),
            signal.direction,
            stake,
            signal.confidence,
            now,
        );

        let due_at = now + Duration::minutes(self.settings.trade_duration_minutes as i64);
        self.queue.schedule(trade_id, contract, due_at);

        Ok(TickOutcome::Opened(trade_id))
    }

    /// Drain and settle every contract due at or before `now`.
    ///
    /// Settlements apply in fire-time order regardless of creation order.
    /// Anomalies (duplicate or unknown ids) are logged by the engine and
    /// skipped. A broker resolution failure puts the entry back in the
    /// queue for the next pass rather than dropping it from the ledger.
    pub async fn settle_due(&mut self, now: DateTime<Utc>) -> Vec<(TradeId, Outcome)> {
        let mut settled = Vec::new();

        for pending in self.queue.pop_due(now) {
            let outcome = match self.broker.resolve(&pending.contract).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        "Failed to resolve contract for {}: {e:#}; retrying next pass",
                        pending.trade_id
                    );
                    self.queue
                        .schedule(pending.trade_id, pending.contract, pending.due_at);
                    continue;
                }
            };

            if self.engine.settle(pending.trade_id, outcome).is_ok() {
                settled.push((pending.trade_id, outcome));
            }
        }

        settled
    }
}
