// src/signals/momentum_velocity.rs
//
// S5: momentum velocity. The 14-day rate of change is smoothed with a 3-day
// SMA; its first difference is the acceleration. Rising and accelerating
// momentum is the strongest buy; falling and decelerating the strongest sell.
// A 5-day drop worse than -5% adds a crash penalty on top, clamped to [-1, 1].

use super::{Signal, SubStrategy};
use crate::indicators::{roc, sma};

const ROC_WINDOW: usize = 14;
const SMOOTH_WINDOW: usize = 3;
const CRASH_WINDOW: usize = 5;
const CRASH_THRESHOLD: f64 = -0.05;
const CRASH_PENALTY: f64 = -0.2;

pub struct MomentumVelocity;

impl MomentumVelocity {
    /// 3-day-smoothed ROC14 over the series ending `back` sessions ago.
    fn velocity(closes: &[f64], back: usize) -> Option<f64> {
        let end = closes.len().checked_sub(back)?;
        if end < SMOOTH_WINDOW {
            return None;
        }
        let rocs: Vec<f64> = (0..SMOOTH_WINDOW)
            .map(|i| roc(&closes[..end - i], ROC_WINDOW))
            .collect::<Option<Vec<_>>>()?;
        sma(&rocs, SMOOTH_WINDOW)
    }
}

impl SubStrategy for MomentumVelocity {
    fn name(&self) -> &'static str {
        "momentum_velocity"
    }

    fn weight(&self) -> f64 {
        0.15
    }

    fn compute(&self, closes: &[f64]) -> Signal {
        let (velocity, prev_velocity) =
            match (Self::velocity(closes, 0), Self::velocity(closes, 1)) {
                (Some(v), Some(p)) => (v, p),
                _ => return Signal::neutral(self.weight()),
            };
        let acceleration = velocity - prev_velocity;

        let mut score = if velocity > 0.0 && acceleration > 0.0 {
            1.0
        } else if velocity < 0.0 && acceleration < 0.0 {
            -0.7
        } else {
            0.0
        };

        if let Some(r5) = roc(closes, CRASH_WINDOW) {
            if r5 < CRASH_THRESHOLD {
                score += CRASH_PENALTY;
            }
        }
        Signal::new(score, self.weight())
    }
}
