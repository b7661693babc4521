// src/signals/primary_trend.rs
//
// S1: primary trend filter over the 50/250-day moving averages.
//
// The ε band around the SMA50 plus the two-session confirmation keep the
// signal from flapping when price oscillates around the average. Both the
// price condition and the SMA50/SMA250 relation must hold on the decision
// session and the one before it.

use super::{Signal, Strength, SubStrategy};
use crate::indicators::sma;

/// Hysteresis band around the SMA50.
const EPSILON: f64 = 0.005;
const CONFIRM_SESSIONS: usize = 2;

pub struct PrimaryTrend;

impl PrimaryTrend {
    fn bull_at(closes: &[f64]) -> Option<bool> {
        let close = *closes.last()?;
        let sma50 = sma(closes, 50)?;
        let sma250 = sma(closes, 250)?;
        Some(close >= sma50 * (1.0 + EPSILON) && sma50 > sma250)
    }

    fn bear_at(closes: &[f64]) -> Option<bool> {
        let close = *closes.last()?;
        let sma50 = sma(closes, 50)?;
        let sma250 = sma(closes, 250)?;
        Some(close <= sma50 * (1.0 - EPSILON) && sma50 < sma250)
    }
}

impl SubStrategy for PrimaryTrend {
    fn name(&self) -> &'static str {
        "primary_trend"
    }

    fn weight(&self) -> f64 {
        0.25
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        // Need 250 bars on the earliest confirming session as well.
        if closes.len() < 250 + CONFIRM_SESSIONS - 1 {
            return Signal::neutral(self.weight());
        }

        let confirmed = |check: fn(&[f64]) -> Option<bool>| -> bool {
            (0..CONFIRM_SESSIONS).all(|back| {
                check(&closes[..closes.len() - back]).unwrap_or(false)
            })
        };

        if confirmed(Self::bull_at) {
            let mut signal = Signal::new(1.0, self.weight());
            signal.strength = Strength::StrongBull;
            signal
        } else if confirmed(Self::bear_at) {
            let mut signal = Signal::new(-0.5, self.weight());
            signal.strength = Strength::StrongBear;
            signal
        } else {
            Signal::neutral(self.weight())
        }
    }
}
