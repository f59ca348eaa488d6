//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for the inference API key.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Money;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingSettings,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    /// and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        if let Ok(api_key) = std::env::var("GEMINI_API_KEY") {
            config.inference.api_key = Some(api_key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate settings and normalize out-of-range values.
    ///
    /// The confidence threshold has a hard floor of 80: the bot never trades
    /// on lower-conviction signals no matter what the file says.
    pub fn validate(&mut self) -> Result<()> {
        let t = &mut self.trading;

        if t.max_stake <= Money::ZERO {
            bail!("trading.max_stake must be positive, got {}", t.max_stake);
        }
        if t.max_consecutive_losses == 0 {
            bail!("trading.max_consecutive_losses must be at least 1");
        }
        if t.trade_duration_minutes == 0 {
            bail!("trading.trade_duration_minutes must be at least 1");
        }
        if !(0.0..=1.0).contains(&t.risk_limit) {
            bail!("trading.risk_limit must be in [0, 1], got {}", t.risk_limit);
        }

        if t.confidence_threshold < TradingSettings::MIN_CONFIDENCE_THRESHOLD {
            tracing::warn!(
                "confidence_threshold {} below floor, raising to {}",
                t.confidence_threshold,
                TradingSettings::MIN_CONFIDENCE_THRESHOLD
            );
            t.confidence_threshold = TradingSettings::MIN_CONFIDENCE_THRESHOLD;
        }
        if t.confidence_threshold > 100 {
            t.confidence_threshold = 100;
        }

        Ok(())
    }
}

/// Trading settings, read-only to the decision engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSettings {
    /// Hard cap on any single stake, in account currency.
    pub max_stake: Money,
    /// Minimum signal confidence (0-100) required to trade. Floored at 80.
    pub confidence_threshold: u8,
    /// Circuit breaker: halt new trades after this many losses in a row.
    pub max_consecutive_losses: u32,
    /// Fixed contract duration in minutes; settlement fires after this.
    pub trade_duration_minutes: u32,
    /// Advisory fraction of balance exposed per trade.
    pub risk_limit: f64,
}

impl TradingSettings {
    /// Hard floor on the confidence threshold.
    pub const MIN_CONFIDENCE_THRESHOLD: u8 = 80;
}

impl Default for TradingSettings {
    fn default() -> Self {
        TradingSettings {
            max_stake: Money::from_f64(10.0),
            confidence_threshold: 80,
            max_consecutive_losses: 3,
            trade_duration_minutes: 1,
            risk_limit: 0.02,
        }
    }
}

/// Inference service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// API key; overridden by GEMINI_API_KEY if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    /// Base URL override for testing against a stub server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Per-request timeout in seconds. One attempt per cycle, no retry.
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        InferenceConfig {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            endpoint: None,
            timeout_secs: 20,
        }
    }
}

/// State persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub db_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            db_path: "state/trader.db".to_string(),
        }
    }
}
