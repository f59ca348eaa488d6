//! Trading governor
//!
//! The single authority allowed to approve a trade. Checks the
//! consecutive-loss circuit breaker first, then the confidence gate. The
//! governor only reads the loss counter; settlement is the sole writer.

use std::fmt;

use crate::config::TradingSettings;
use crate::Signal;

/// Why the governor declined a cycle. Rejection is a normal outcome, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Too many consecutive losses; trading halts until a win resets the
    /// counter.
    CircuitBreakerOpen { consecutive_losses: u32 },
    /// Signal confidence fell short of the configured threshold.
    LowConfidence { confidence: u8, threshold: u8 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::CircuitBreakerOpen { consecutive_losses } => {
                write!(f, "circuit breaker: {consecutive_losses} consecutive losses")
            }
            RejectReason::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence}% below threshold {threshold}%"),
        }
    }
}

/// Go/no-go decision for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected(RejectReason),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approved)
    }
}

/// Approval gate for the decision loop
#[derive(Debug, Clone, Copy, Default)]
pub struct TradingGovernor;

impl TradingGovernor {
    pub fn new() -> Self {
        TradingGovernor
    }

    /// Gate one cycle. The circuit breaker takes priority over every other
    /// check and fires before any stake computation happens.
    pub fn approve(
        &self,
        signal: &Signal,
        consecutive_losses: u32,
        settings: &TradingSettings,
    ) -> Decision {
        if consecutive_losses >= settings.max_consecutive_losses {
            return Decision::Rejected(RejectReason::CircuitBreakerOpen { consecutive_losses });
        }

        if !signal.should_trade {
            return Decision::Rejected(RejectReason::LowConfidence {
                confidence: signal.confidence,
                threshold: settings.confidence_threshold,
            });
        }

        Decision::Approved
    }
}
