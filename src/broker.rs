//! Brokerage collaborator
//!
//! The engine consumes the brokerage through the [`Broker`] trait: account
//! listing, contract submission, and outcome resolution for matured
//! contracts. The reported outcome is authoritative; the engine never
//! recomputes a payout.
//!
//! [`PaperBroker`] is the built-in simulator for paper trading: contracts
//! are accepted unconditionally and outcomes are drawn from a configurable
//! win probability.

use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::{Account, AccountKind, ContractRef, Direction, Money, Outcome, Symbol};

/// Brokerage operations used by the decision loop.
#[async_trait]
pub trait Broker: Send + Sync {
    /// List the accounts available to the current session.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Submit a binary options contract; returns the broker's reference.
    async fn submit_contract(
        &self,
        symbol: &Symbol,
        direction: Direction,
        stake: Money,
        duration_minutes: u32,
    ) -> Result<ContractRef>;

    /// Resolve the outcome of a matured contract.
    async fn resolve(&self, contract: &ContractRef) -> Result<Outcome>;
}

/// Simulated brokerage for paper trading
pub struct PaperBroker {
    accounts: Vec<Account>,
    next_ref: AtomicU64,
    win_probability: Mutex<f64>,
}

impl PaperBroker {
    /// Default simulated win probability with no trading history.
    pub const BASE_WIN_PROBABILITY: f64 = 0.5;

    pub fn new() -> Self {
        PaperBroker {
            accounts: vec![
                Account {
                    id: "VRTC-1001".to_string(),
                    name: "Demo Account".to_string(),
                    kind: AccountKind::Demo,
                    currency: "USD".to_string(),
                    balance: Money::from_f64(10_000.0),
                },
                Account {
                    id: "CR-2001".to_string(),
                    name: "Real Account".to_string(),
                    kind: AccountKind::Real,
                    currency: "USD".to_string(),
                    balance: Money::from_f64(1_000.0),
                },
            ],
            next_ref: AtomicU64::new(1),
            win_probability: Mutex::new(Self::BASE_WIN_PROBABILITY),
        }
    }

    /// Adjust the simulated win probability. The paper loop nudges this
    /// from the running win rate so streaks behave plausibly.
    pub fn set_win_probability(&self, p: f64) {
        *self.win_probability.lock().expect("win probability lock") = p.clamp(0.0, 1.0);
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    async fn submit_contract(
        &self,
        symbol: &Symbol,
        direction: Direction,
        stake: Money,
        duration_minutes: u32,
    ) -> Result<ContractRef> {
        let n = self.next_ref.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "Paper contract #{n}: {symbol} {direction} stake {stake} duration {duration_minutes}m"
        );
        Ok(ContractRef(format!("PAPER-{n}")))
    }

    async fn resolve(&self, _contract: &ContractRef) -> Result<Outcome> {
        let p = *self.win_probability.lock().expect("win probability lock");
        let won = rand::thread_rng().gen_bool(p);
        Ok(if won { Outcome::Won } else { Outcome::Lost })
    }
}
