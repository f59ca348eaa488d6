//! Trading engine: trade lifecycle and stats ledger
//!
//! The engine is the single owner of the trade collection, the running
//! stats, and the consecutive-loss counter. Trades enter in `Pending`
//! state and settle exactly once into `Won` or `Lost`; settlement updates
//! the trade, the loss counter, and the ledger inside one `&mut self`
//! method, so no observer ever sees a half-applied settlement.
//!
//! Presentation layers subscribe to [`EngineEvent`]s over a broadcast
//! channel instead of reaching into engine state.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{Account, Direction, Money, Outcome, Stats, Symbol, Trade, TradeId, TradeStatus};

/// Settlement anomalies. Both are logged and ignored by callers rather than
/// applied; re-applying would double-count P&L.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettleError {
    #[error("settlement for unknown trade {0}")]
    UnknownTrade(TradeId),

    #[error("trade {0} already settled")]
    AlreadySettled(TradeId),
}

/// Change notification emitted by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    AccountSelected(Account),
    TradeOpened(Trade),
    TradeSettled { trade: Trade, stats: Stats },
}

/// Decision-and-risk engine state owner
pub struct TradingEngine {
    trades: HashMap<TradeId, Trade>,
    history: Vec<TradeId>,
    stats: Stats,
    consecutive_losses: u32,
    selected_account: Option<Account>,
    next_id: u64,
    events: broadcast::Sender<EngineEvent>,
}

impl TradingEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        TradingEngine {
            trades: HashMap::new(),
            history: Vec::new(),
            stats: Stats::default(),
            consecutive_losses: 0,
            selected_account: None,
            next_id: 1,
            events,
        }
    }

    /// Subscribe to engine change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Select the active account and seed the ledger balance from it.
    pub fn select_account(&mut self, account: Account) {
        info!(
            "Selected account: {} ({}) - balance {} {}",
            account.name, account.id, account.balance, account.currency
        );
        self.stats.balance = account.balance;
        self.selected_account = Some(account.clone());
        let _ = self.events.send(EngineEvent::AccountSelected(account));
    }

    pub fn selected_account(&self) -> Option<&Account> {
        self.selected_account.as_ref()
    }

    /// Snapshot of the ledger as of now. Callers treat this as read-only
    /// state taken at the start of their own cycle.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn trade(&self, id: TradeId) -> Option<&Trade> {
        self.trades.get(&id)
    }

    /// Trades in creation order, newest last. Never pruned.
    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.history.iter().filter_map(|id| self.trades.get(id))
    }

    pub fn pending_count(&self) -> usize {
        self.trades
            .values()
            .filter(|t| t.status == TradeStatus::Pending)
            .count()
    }

    /// Restore ledger totals from persisted state (paper-mode resume).
    pub fn restore_stats(&mut self, stats: Stats, consecutive_losses: u32) {
        self.stats = stats;
        self.consecutive_losses = consecutive_losses;
    }

    /// Continue id generation after `last_id` (paper-mode resume). Without
    /// this a resumed session would reissue ids already recorded in the
    /// audit trail.
    pub fn resume_trade_ids(&mut self, last_id: TradeId) {
        self.next_id = self.next_id.max(last_id.0 + 1);
    }

    /// Create a trade in `Pending` state. The stake is fixed here and never
    /// changes afterwards.
    pub fn open_trade(
        &mut self,
        symbol: Symbol,
        direction: Direction,
        stake: Money,
        confidence: u8,
        created_at: DateTime<Utc>,
    ) -> TradeId {
        let id = TradeId(self.next_id);
        self.next_id += 1;

        let trade = Trade {
            id,
            symbol,
            direction,
            stake,
            confidence,
            created_at,
            status: TradeStatus::Pending,
            pnl: None,
        };

        info!(
            "Opened {}: {} {} stake {} (confidence {}%)",
            id, trade.symbol, trade.direction, trade.stake, trade.confidence
        );

        self.trades.insert(id, trade.clone());
        self.history.push(id);
        let _ = self.events.send(EngineEvent::TradeOpened(trade));
        id
    }

    /// Settle a trade exactly once.
    ///
    /// Applies, as one atomic unit: the trade's terminal status and pnl, the
    /// consecutive-loss counter (reset on win, increment on loss), and the
    /// stats ledger. A second settlement of the same id is an anomaly: it is
    /// logged and left unapplied.
    pub fn settle(&mut self, id: TradeId, outcome: Outcome) -> Result<&Trade, SettleError> {
        let trade = match self.trades.get_mut(&id) {
            Some(trade) => trade,
            None => {
                warn!("Settlement for unknown trade {id}; ignoring");
                return Err(SettleError::UnknownTrade(id));
            }
        };

        if trade.status.is_terminal() {
            warn!("Duplicate settlement for {id} ({:?}); ignoring", trade.status);
            return Err(SettleError::AlreadySettled(id));
        }

        let pnl = match outcome {
            Outcome::Won => trade.stake,
            Outcome::Lost => -trade.stake,
        };
        trade.status = match outcome {
            Outcome::Won => TradeStatus::Won,
            Outcome::Lost => TradeStatus::Lost,
        };
        trade.pnl = Some(pnl);

        match outcome {
            Outcome::Won => {
                self.stats.wins += 1;
                self.consecutive_losses = 0;
                info!("Trade {id} won: +{}", trade.stake);
            }
            Outcome::Lost => {
                self.stats.losses += 1;
                self.consecutive_losses += 1;
                info!(
                    "Trade {id} lost: -{} ({} consecutive)",
                    trade.stake, self.consecutive_losses
                );
            }
        }

        self.stats.total_trades = self.stats.wins + self.stats.losses;
        self.stats.win_rate = if self.stats.total_trades > 0 {
            self.stats.wins as f64 / self.stats.total_trades as f64
        } else {
            0.0
        };
        self.stats.total_pnl += pnl;
        self.stats.balance += pnl;

        let settled = self.trades.get(&id).expect("trade exists");
        let _ = self.events.send(EngineEvent::TradeSettled {
            trade: settled.clone(),
            stats: self.stats.clone(),
        });
        Ok(settled)
    }
}

impl Default for TradingEngine {
    fn default() -> Self {
        Self::new()
    }
}
