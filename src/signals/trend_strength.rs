// src/signals/trend_strength.rs
//
// S4: trend strength from the 60-day regression slope, normalized as a
// z-score against up to 252 days of its own history and read against the
// 200-day SMA side.
//
// Five states: a strong slope (|z| > 1.5) that agrees with price being above
// the SMA200 scores +1.0, a moderate one +0.5; strong/moderate slopes that do
// not confirm the bull side score -0.5/-0.3; |z| <= 0.5 is neutral.

use super::{Signal, SubStrategy};
use crate::indicators::{linreg_slope, sma, zscore};

const SLOPE_WINDOW: usize = 60;
const ZSCORE_WINDOW: usize = 252;
/// Fewer slope samples than this and the z-score is meaningless.
const MIN_SLOPE_SAMPLES: usize = 60;

pub struct TrendStrength;

impl SubStrategy for TrendStrength {
    fn name(&self) -> &'static str {
        "trend_strength"
    }

    fn weight(&self) -> f64 {
        0.10
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (close, sma200) = match (closes.last(), sma(closes, 200)) {
            (Some(&c), Some(s)) => (c, s),
            _ => return Signal::neutral(self.weight()),
        };
        let slope = match linreg_slope(closes, SLOPE_WINDOW) {
            Some(s) => s,
            None => return Signal::neutral(self.weight()),
        };

        // Slope history over as many of the last 252 sessions as the data
        // allows, evaluated the same way as the current slope.
        let max_samples = closes.len().saturating_sub(SLOPE_WINDOW - 1).min(ZSCORE_WINDOW);
        if max_samples < MIN_SLOPE_SAMPLES {
            return Signal::neutral(self.weight());
        }
        let slopes: Vec<f64> = (0..max_samples)
            .map(|back| {
                let end = closes.len() - back;
                linreg_slope(&closes[..end], SLOPE_WINDOW).unwrap_or(0.0)
            })
            .collect();
        let z = match zscore(slope, &slopes) {
            Some(z) => z,
            None => return Signal::neutral(self.weight()),
        };

        let bull_side = close > sma200;
        let slope_up = slope > 0.0;
        let score = if z.abs() > 1.5 {
            if bull_side && slope_up {
                1.0
            } else {
                -0.5
            }
        } else if z.abs() > 0.5 {
            if bull_side && slope_up {
                0.5
            } else {
                -0.3
            }
        } else {
            0.0
        };
        Signal::new(score, self.weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_breakout_scores_positive() {
        // Flat for a year, then a steep two-month ramp: the latest slope is an
        // outlier against its own history, and price sits above the SMA200.
        let mut closes = vec![100.0; 320];
        let start = *closes.last().unwrap();
        for i in 0..60 {
            closes.push(start + (i + 1) as f64 * 1.5);
        }
        let signal = TrendStrength.compute(&closes);
        assert!(signal.raw_score > 0.0, "score = {}", signal.raw_score);
    }

    #[test]
    fn test_fresh_breakdown_scores_negative() {
        let mut closes = vec![100.0; 320];
        let start = *closes.last().unwrap();
        for i in 0..60 {
            closes.push(start - (i + 1) as f64 * 1.2);
        }
        let signal = TrendStrength.compute(&closes);
        assert!(signal.raw_score < 0.0, "score = {}", signal.raw_score);
    }

    #[test]
    fn test_steady_trend_is_not_an_outlier() {
        // A constant-slope line has identical slope everywhere: z = 0.
        let closes: Vec<f64> = (0..400).map(|i| 100.0 + i as f64).collect();
        assert_eq!(TrendStrength.compute(&closes).raw_score, 0.0);
    }

    #[test]
    fn test_short_history_neutral() {
        let closes = vec![10.0; 150];
        assert_eq!(TrendStrength.compute(&closes).raw_score, 0.0);
    }
}
