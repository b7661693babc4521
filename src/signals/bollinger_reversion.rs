// src/signals/bollinger_reversion.rs
//
// S6: Bollinger %B mean reversion, gated by the 200-day SMA regime. Dips in
// an uptrend are bought aggressively; overbought readings in a downtrend are
// faded lightly; a deep-oversold %B < 0.05 earns a tactical bounce signal in
// any regime.

use super::{Signal, SubStrategy};
use crate::indicators::{bollinger_pct_b, sma};

const BAND_WINDOW: usize = 20;
const BAND_WIDTH: f64 = 2.0;

pub struct BollingerReversion;

impl SubStrategy for BollingerReversion {
    fn name(&self) -> &'static str {
        "bollinger_reversion"
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (close, pct_b, sma200) = match (
            closes.last(),
            bollinger_pct_b(closes, BAND_WINDOW, BAND_WIDTH),
            sma(closes, 200),
        ) {
            (Some(&c), Some(b), Some(s)) => (c, b, s),
            _ => return Signal::neutral(self.weight()),
        };

        let uptrend = close > sma200;
        let score = if uptrend && pct_b < 0.2 {
            1.0
        } else if !uptrend && pct_b > 0.95 {
            -0.3
        } else if pct_b < 0.05 {
            0.8
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
    fn test_dip_in_uptrend_is_bought() {
        // Long climb keeps price above the SMA200, then a sharp five-day dip
        // drops %B below 0.2 while price stays above the long average.
        let mut closes: Vec<f64> = (0..250).map(|i| 100.0 + i as f64).collect();
        for _ in 0..5 {
            closes.push(closes.last().unwrap() - 6.0);
        }
        let signal = BollingerReversion.compute(&closes);
        assert_eq!(signal.raw_score, 1.0);
    }

    #[test]
    fn test_rally_in_downtrend_is_faded() {
        // A violent three-session squeeze pushes %B past the upper band
        // while price remains far below the SMA200.
        let mut closes: Vec<f64> = (0..250).map(|i| 500.0 - 1.5 * i as f64).collect();
        for _ in 0..3 {
            closes.push(closes.last().unwrap() + 15.0);
        }
        let signal = BollingerReversion.compute(&closes);
        assert_eq!(signal.raw_score, -0.3);
    }

    #[test]
    fn test_deep_oversold_bounce_in_downtrend() {
        // Accelerating sell-off below the SMA200: %B pins near 0.
        let mut closes: Vec<f64> = (0..250).map(|i| 500.0 - i as f64).collect();
        for i in 0..5 {
            closes.push(closes.last().unwrap() - 10.0 - i as f64 * 4.0);
        }
        let signal = BollingerReversion.compute(&closes);
        assert_eq!(signal.raw_score, 0.8);
    }

    #[test]
    fn test_mid_band_neutral() {
        let closes = vec![100.0; 260];
        assert_eq!(BollingerReversion.compute(&closes).raw_score, 0.0);
    }
}
