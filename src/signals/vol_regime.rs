// src/signals/vol_regime.rs
//
// S7: volatility regime. Compares 20-day to 60-day realized volatility:
// compression (ratio < 0.8) in an uptrend is constructive, an expansion past
// 2.0 overrides any trend reading.

use super::{Signal, SubStrategy};
use crate::indicators::{realized_vol, sma};

const FAST_WINDOW: usize = 20;
const SLOW_WINDOW: usize = 60;

pub struct VolRegime;

impl SubStrategy for VolRegime {
    fn name(&self) -> &'static str {
        "vol_regime"
    }

    fn weight(&self) -> f64 {
        0.10
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (close, fast, slow, sma100) = match (
            closes.last(),
            realized_vol(closes, FAST_WINDOW),
            realized_vol(closes, SLOW_WINDOW),
            sma(closes, 100),
        ) {
            (Some(&c), Some(f), Some(s), Some(m)) => (c, f, s, m),
            _ => return Signal::neutral(self.weight()),
        };
        if slow == 0.0 {
            return Signal::neutral(self.weight());
        }

        let ratio = fast / slow;
        let score = if ratio > 2.0 {
            // Vol doubling is a regime break regardless of trend.
            -0.3
        } else if ratio < 0.8 && close > sma100 {
            1.0
        } else {
            0.0
        };
        Signal::new(score, self.weight())
    }
}
