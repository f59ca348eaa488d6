//! Risk sizing
//!
//! Converts signal confidence and the account's historical win rate into a
//! bounded stake using a capped fractional-Kelly rule. Everything here is
//! pure and computed in decimal arithmetic: same inputs, same stake, bit
//! for bit.
//!
//! Binary options pay out the stake on a win and forfeit it on a loss, so
//! the payout ratio `b` is fixed at 1 and the Kelly fraction reduces to
//! `p - q`. The fraction is clamped to `[0.01, 0.25]`: the floor prevents
//! zero or negative sizing, the cap prevents over-betting on a hot streak.

use crate::config::TradingSettings;
use crate::Money;

/// Stateless stake calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskSizer;

impl RiskSizer {
    /// Lower clamp on the Kelly fraction.
    const KELLY_FLOOR: f64 = 0.01;

    /// Upper clamp on the Kelly fraction.
    const KELLY_CAP: f64 = 0.25;

    /// Even maximal model confidence only applies 80% of the Kelly stake.
    const CONFIDENCE_CEILING: f64 = 0.8;

    /// Fraction of the max stake used when the win rate carries no signal.
    const DEGENERATE_FRACTION: f64 = 0.25;

    pub fn new() -> Self {
        RiskSizer
    }

    /// Clamped Kelly fraction for a given win rate, with unit payout ratio.
    ///
    /// Only meaningful for `win_rate` strictly inside (0, 1); degenerate
    /// rates are handled by [`RiskSizer::size`] before this is consulted.
    pub fn kelly_fraction(&self, win_rate: f64) -> f64 {
        self.kelly_decimal(win_rate).to_f64()
    }

    fn kelly_decimal(&self, win_rate: f64) -> Money {
        let p = Money::from_f64(win_rate);
        let q = Money::ONE - p;
        // b = 1: kelly = (b*p - q) / b = p - q
        let kelly = p - q;
        kelly
            .max(Money::from_f64(Self::KELLY_FLOOR))
            .min(Money::from_f64(Self::KELLY_CAP))
    }

    /// Compute the stake for one trade.
    ///
    /// A win rate of exactly 0 or 1 (or anything outside that open interval)
    /// means the history is empty, too short, or too good to trust; those
    /// cases get a flat quarter of the max stake.
    pub fn size(
        &self,
        confidence_hint: u8,
        win_rate: f64,
        balance: Money,
        settings: &TradingSettings,
    ) -> Money {
        if win_rate <= 0.0 || win_rate >= 1.0 {
            return (settings.max_stake * Money::from_f64(Self::DEGENERATE_FRACTION))
                .min(settings.max_stake);
        }

        let kelly = self.kelly_decimal(win_rate);
        let confidence_factor = Money::from_f64(confidence_hint as f64)
            / Money::from_f64(100.0)
            * Money::from_f64(Self::CONFIDENCE_CEILING);

        let raw = balance * kelly * confidence_factor;
        raw.min(settings.max_stake).max(Money::ONE)
    }
}
