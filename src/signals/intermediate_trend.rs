// src/signals/intermediate_trend.rs
//
// S2: intermediate trend over the 20/100-day moving averages. A half-signal
// is emitted when price and the averages disagree (one condition but not both).

use super::{Signal, SubStrategy};
use crate::indicators::sma;

pub struct IntermediateTrend;

impl SubStrategy for IntermediateTrend {
    fn name(&self) -> &'static str {
        "intermediate_trend"
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (close, sma20, sma100) = match (closes.last(), sma(closes, 20), sma(closes, 100)) {
            (Some(&c), Some(s20), Some(s100)) => (c, s20, s100),
            _ => return Signal::neutral(self.weight()),
        };

        let above_fast = close > sma20;
        let fast_above_slow = sma20 > sma100;

        let score = if above_fast && fast_above_slow {
            1.0
        } else if above_fast ^ fast_above_slow {
            0.3
        } else if close < sma20 && sma20 < sma100 {
            -0.5
        } else {
            0.0
        };
        Signal::new(score, self.weight())
    }
}
