//! AI Binary Trader
//!
//! An autonomous binary-options trading assistant: samples a market,
//! obtains a directional signal from a text-completion inference service,
//! sizes the stake with a capped fractional-Kelly rule, submits the
//! contract, and settles each trade into a running win/loss ledger under a
//! confidence gate and a consecutive-loss circuit breaker.

pub mod config;
pub mod types;
pub mod inference;
pub mod analyzer;
pub mod risk;
pub mod governor;
pub mod scheduler;
pub mod engine;
pub mod broker;
pub mod market;
pub mod bot;
pub mod state_manager;

pub use config::Config;
pub use types::*;
