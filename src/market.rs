//! Market data collaborator
//!
//! The decision loop requests one [`MarketSnapshot`] per tick through the
//! [`MarketData`] trait. The built-in [`SimulatedFeed`] produces synthetic
//! matches-contract markets; indicators are generated, never computed from
//! real data, matching the engine's contract that they are opaque inputs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;

use crate::{MacdBias, MarketSnapshot, PricePoint, Symbol, Trend};

/// Source of per-tick market snapshots.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn snapshot(&self) -> Result<MarketSnapshot>;
}

const MATCH_MARKETS: &[(&str, &str)] = &[
    ("MATCH_EURUSD", "EURUSD Match"),
    ("MATCH_GBPUSD", "GBPUSD Match"),
    ("MATCH_USDJPY", "USDJPY Match"),
];

const BASE_PRICE: f64 = 1.0800;
const HISTORY_PERIODS: usize = 20;

/// Synthetic FX matches-market feed
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedFeed;

impl SimulatedFeed {
    pub fn new() -> Self {
        SimulatedFeed
    }
}

#[async_trait]
impl MarketData for SimulatedFeed {
    async fn snapshot(&self) -> Result<MarketSnapshot> {
        let mut rng = rand::thread_rng();

        let (symbol, display) = MATCH_MARKETS[rng.gen_range(0..MATCH_MARKETS.len())];
        let current_price = BASE_PRICE + (rng.gen::<f64>() - 0.5) * 0.02;
        let volatility = 0.3 + rng.gen::<f64>() * 0.5;
        let rsi = 30.0 + rng.gen::<f64>() * 40.0;
        let macd = if rng.gen_bool(0.5) {
            MacdBias::Bullish
        } else {
            MacdBias::Bearish
        };
        let trend = if rsi > 50.0 {
            Trend::Uptrend
        } else {
            Trend::Downtrend
        };

        let now = Utc::now();
        let history = (0..HISTORY_PERIODS)
            .map(|i| PricePoint {
                timestamp: now - Duration::minutes(5 * (HISTORY_PERIODS - i) as i64),
                price: BASE_PRICE + (rng.gen::<f64>() - 0.5) * 0.03,
            })
            .collect();

        Ok(MarketSnapshot {
            symbol: Symbol::new(symbol),
            display: display.to_string(),
            current_price,
            volatility,
            trend,
            rsi,
            macd,
            history,
        })
    }
}
