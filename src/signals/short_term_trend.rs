// src/signals/short_term_trend.rs
//
// S3: short-term trend over the 10/30-day moving averages. Price above a
// falling fast average still earns a half-signal (early recovery).

use super::{Signal, SubStrategy};
use crate::indicators::sma;

pub struct ShortTermTrend;

impl SubStrategy for ShortTermTrend {
    fn name(&self) -> &'static str {
        "short_term_trend"
    }

    fn weight(&self) -> f64 {
        0.10
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (close, sma10, sma30) = match (closes.last(), sma(closes, 10), sma(closes, 30)) {
            (Some(&c), Some(s10), Some(s30)) => (c, s10, s30),
            _ => return Signal::neutral(self.weight()),
        };

        let score = if close > sma10 && sma10 > sma30 {
            1.0
        } else if close > sma10 && sma10 < sma30 {
            0.5
        } else if close < sma10 && sma10 < sma30 {
            -0.3
        } else {
            0.0
        };
        Signal::new(score, self.weight())
    }
}
