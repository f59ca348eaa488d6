//! Signal analyzer
//!
//! Turns a market snapshot into a normalized trading signal by prompting the
//! inference service and parsing the embedded JSON object out of its free-text
//! reply. Every failure path degrades to a deterministic fallback signal
//! derived purely from the snapshot; this component never returns an error.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::TradingSettings;
use crate::inference::Inference;
use crate::{Direction, MarketSnapshot, Money, RiskLevel, Signal, Trend};

/// Why the analyzer fell back to a locally derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Transport or HTTP failure; no reply was received.
    Unreachable,
    /// A reply arrived but contained no parseable signal object.
    Degraded,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Unreachable => write!(f, "inference unreachable"),
            FallbackReason::Degraded => write!(f, "inference reply unparseable"),
        }
    }
}

/// Analysis result: a live parsed signal, or the deterministic fallback.
#[derive(Debug, Clone)]
pub enum Analysis {
    Parsed(Signal),
    Fallback {
        signal: Signal,
        reason: FallbackReason,
    },
}

impl Analysis {
    pub fn signal(&self) -> &Signal {
        match self {
            Analysis::Parsed(s) => s,
            Analysis::Fallback { signal, .. } => signal,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Analysis::Fallback { .. })
    }
}

/// Signal analyzer backed by an inference collaborator
pub struct SignalAnalyzer {
    inference: Arc<dyn Inference>,
}

impl SignalAnalyzer {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        SignalAnalyzer { inference }
    }

    /// Analyze one snapshot. One inference attempt, no retry.
    pub async fn analyze(&self, snapshot: &MarketSnapshot, settings: &TradingSettings) -> Analysis {
        let prompt = build_prompt(snapshot);

        let reply = match self.inference.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Inference call failed: {e:#}");
                return fallback(snapshot, settings, FallbackReason::Unreachable);
            }
        };

        match parse_reply(&reply, snapshot, settings) {
            Some(signal) => {
                info!(
                    "AI signal: {} | confidence {}% | risk {} | {}",
                    signal.direction,
                    signal.confidence,
                    signal.risk_level,
                    truncate_reasoning(&signal.reasoning)
                );
                Analysis::Parsed(signal)
            }
            None => {
                warn!("Inference replied but no signal object found; using fallback");
                fallback(snapshot, settings, FallbackReason::Degraded)
            }
        }
    }
}

/// Build the structured natural-language prompt for one snapshot.
fn build_prompt(snapshot: &MarketSnapshot) -> String {
    use std::fmt::Write;

    let mut prompt = format!(
        "Market Symbol: {}\n\
         Current Price: ${:.4}\n\
         Volatility: {:.2}\n\
         RSI (Relative Strength Index): {}\n\
         MACD Signal: {}\n\
         Trend: {}\n\n\
         Historical Data (last {} periods):\n",
        snapshot.display,
        snapshot.current_price,
        snapshot.volatility,
        snapshot.rsi.round() as i64,
        match snapshot.macd {
            crate::MacdBias::Bullish => "bullish",
            crate::MacdBias::Bearish => "bearish",
        },
        match snapshot.trend {
            Trend::Uptrend => "uptrend",
            Trend::Downtrend => "downtrend",
        },
        snapshot.history.len(),
    );

    for (i, point) in snapshot.history.iter().enumerate() {
        let _ = writeln!(prompt, "Period {}: ${:.4}", i, point.price);
    }

    prompt.push_str(
        "\nPlease analyze this market data and provide:\n\
         1. A trading signal (BUY for uptrend, SELL for downtrend)\n\
         2. Confidence level (0-100%)\n\
         3. Risk assessment (LOW/MEDIUM/HIGH)\n\
         4. Key reasoning for your signal\n\
         5. Suggested position size (as fraction of the maximum stake)\n\n\
         Respond in JSON format with keys: signal, confidence, riskLevel, \
         reasoning, positionSize.",
    );

    prompt
}

/// Extract and normalize the first embedded JSON object in the reply.
///
/// Returns None when no object is present or it cannot be parsed; individual
/// fields that are missing or out of domain are replaced by snapshot-derived
/// defaults rather than failing the whole reply.
fn parse_reply(
    reply: &str,
    snapshot: &MarketSnapshot,
    settings: &TradingSettings,
) -> Option<Signal> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: serde_json::Value = serde_json::from_str(&reply[start..=end]).ok()?;

    let confidence = parsed
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(clamp_confidence)
        .unwrap_or_else(|| fallback_confidence(snapshot));

    let direction = parsed
        .get("signal")
        .and_then(|v| v.as_str())
        .and_then(parse_direction)
        .unwrap_or_else(|| trend_direction(snapshot.trend));

    let risk_level = parsed
        .get("riskLevel")
        .and_then(|v| v.as_str())
        .and_then(parse_risk_level)
        .unwrap_or_else(|| risk_from_confidence(confidence));

    let reasoning = parsed
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or(reply)
        .to_string();

    let position_size = parsed
        .get("positionSize")
        .and_then(|v| v.as_f64())
        .map(|p| p.clamp(0.0, 1.0))
        .unwrap_or(1.0);

    Some(make_signal(
        confidence,
        direction,
        risk_level,
        reasoning,
        position_size,
        settings,
    ))
}

/// Deterministic fallback signal, computed purely from the snapshot.
fn fallback(snapshot: &MarketSnapshot, settings: &TradingSettings, reason: FallbackReason) -> Analysis {
    let confidence = fallback_confidence(snapshot);
    let signal = make_signal(
        confidence,
        trend_direction(snapshot.trend),
        risk_from_confidence(confidence),
        format!(
            "Fallback analysis ({reason}). Market trend: {:?}. RSI: {}",
            snapshot.trend,
            snapshot.rsi.round() as i64
        ),
        1.0,
        settings,
    );
    Analysis::Fallback { signal, reason }
}

fn make_signal(
    confidence: u8,
    direction: Direction,
    risk_level: RiskLevel,
    reasoning: String,
    position_size: f64,
    settings: &TradingSettings,
) -> Signal {
    let should_trade = confidence >= settings.confidence_threshold;
    let suggested = suggested_stake(confidence, position_size, settings.max_stake);

    Signal {
        confidence,
        direction,
        risk_level,
        reasoning,
        should_trade,
        suggested_stake: suggested,
    }
}

fn clamp_confidence(raw: f64) -> u8 {
    raw.clamp(0.0, 100.0).round() as u8
}

/// Fallback confidence sits in the bottom half of the range so fallback
/// signals are systematically more conservative than live ones: 25 at a
/// neutral RSI of 50, up to 50 at the extremes.
fn fallback_confidence(snapshot: &MarketSnapshot) -> u8 {
    let distance = (snapshot.rsi - 50.0).abs().min(50.0);
    (25.0 + distance / 2.0).round() as u8
}

fn trend_direction(trend: Trend) -> Direction {
    match trend {
        Trend::Uptrend => Direction::Higher,
        Trend::Downtrend => Direction::Lower,
    }
}

fn parse_direction(raw: &str) -> Option<Direction> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "BUY" => Some(Direction::Higher),
        "SELL" => Some(Direction::Lower),
        _ => None,
    }
}

fn parse_risk_level(raw: &str) -> Option<RiskLevel> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "LOW" => Some(RiskLevel::Low),
        "MEDIUM" => Some(RiskLevel::Medium),
        "HIGH" => Some(RiskLevel::High),
        _ => None,
    }
}

/// Stated risk derived monotonically from confidence.
fn risk_from_confidence(confidence: u8) -> RiskLevel {
    if confidence > 75 {
        RiskLevel::Low
    } else if confidence > 60 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Pre-risk stake hint: confidence-weighted share of the max stake, rounded
/// to the nearest 0.5 currency unit, never above the max stake.
fn suggested_stake(confidence: u8, position_size: f64, max_stake: Money) -> Money {
    let raw = (confidence as f64 / 100.0) * max_stake.to_f64() * position_size;
    let rounded = (raw * 2.0).round() / 2.0;
    Money::from_f64(rounded).min(max_stake)
}

/// Truncate reasoning text for log lines.
pub fn truncate_reasoning(reasoning: &str) -> String {
    const MAX: usize = 100;
    if reasoning.chars().count() <= MAX {
        reasoning.to_string()
    } else {
        let cut: String = reasoning.chars().take(MAX).collect();
        format!("{cut}...")
    }
}
