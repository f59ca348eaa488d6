//! State persistence for live trading
//!
//! SQLite-backed audit trail of settled trades plus ledger checkpoints, so
//! a restarted paper session resumes its stats instead of starting cold.
//! Monetary values are stored as decimal strings, never floats.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::{Money, Stats, Trade, TradeId, TradeStatus};

/// SQLite store for settled trades and stats checkpoints
pub struct StateStore {
    conn: Arc<Mutex<Connection>>,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                stake TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                status TEXT NOT NULL,
                pnl TEXT
            );
            CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                total_pnl TEXT NOT NULL,
                balance TEXT NOT NULL,
                consecutive_losses INTEGER NOT NULL
            );",
        )
        .context("Failed to initialize state schema")?;

        Ok(StateStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record a settled trade. Called once per settlement, after the engine
    /// has applied it.
    pub fn record_trade(&self, trade: &Trade) -> Result<()> {
        let status = match trade.status {
            TradeStatus::Pending => "pending",
            TradeStatus::Won => "won",
            TradeStatus::Lost => "lost",
        };

        let conn = self.conn.lock().expect("state db lock");
        conn.execute(
            "INSERT OR REPLACE INTO trades
             (id, symbol, direction, stake, confidence, created_at, status, pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trade.id.0 as i64,
                trade.symbol.as_str(),
                trade.direction.to_string(),
                trade.stake.to_string(),
                trade.confidence as i64,
                trade.created_at.to_rfc3339(),
                status,
                trade.pnl.map(|p| p.to_string()),
            ],
        )
        .context("Failed to record trade")?;

        debug!("Recorded {} as {status}", trade.id);
        Ok(())
    }

    /// Append a ledger checkpoint.
    pub fn save_checkpoint(&self, stats: &Stats, consecutive_losses: u32) -> Result<()> {
        let conn = self.conn.lock().expect("state db lock");
        conn.execute(
            "INSERT INTO checkpoints
             (timestamp, total_trades, wins, losses, win_rate,
              total_pnl, balance, consecutive_losses)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                Utc::now().to_rfc3339(),
                stats.total_trades as i64,
                stats.wins as i64,
                stats.losses as i64,
                stats.win_rate,
                stats.total_pnl.to_string(),
                stats.balance.to_string(),
                consecutive_losses as i64,
            ],
        )
        .context("Failed to save checkpoint")?;
        Ok(())
    }

    /// Load the most recent checkpoint, if any.
    pub fn load_checkpoint(&self) -> Result<Option<(Stats, u32)>> {
        let conn = self.conn.lock().expect("state db lock");
        let row = conn
            .query_row(
                "SELECT total_trades, wins, losses, win_rate,
                        total_pnl, balance, consecutive_losses
                 FROM checkpoints ORDER BY seq DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load checkpoint")?;

        let Some((total, wins, losses, win_rate, total_pnl, balance, streak)) = row else {
            return Ok(None);
        };

        let stats = Stats {
            total_trades: total as u32,
            wins: wins as u32,
            losses: losses as u32,
            win_rate,
            total_pnl: total_pnl.parse::<Money>().context("Bad total_pnl in db")?,
            balance: balance.parse::<Money>().context("Bad balance in db")?,
        };
        Ok(Some((stats, streak as u32)))
    }

    /// Highest recorded trade id, if any trades have been recorded.
    pub fn last_trade_id(&self) -> Result<Option<TradeId>> {
        let conn = self.conn.lock().expect("state db lock");
        let max: Option<i64> = conn
            .query_row("SELECT MAX(id) FROM trades", [], |row| row.get(0))
            .context("Failed to read max trade id")?;
        Ok(max.map(|id| TradeId(id as u64)))
    }

    /// Number of recorded trades.
    pub fn trade_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("state db lock");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
