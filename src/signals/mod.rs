// Sub-strategy signals.
//
// Seven enumerated sub-strategies each map a close-price history to a bounded
// signal. Signals are pure functions of the history tail: no persisted state,
// equal inputs yield equal outputs. Weights are fixed constants summing to
// 1.0; the weighted composite score is telemetry only and never drives
// allocation.

pub mod bollinger_reversion;
pub mod intermediate_trend;
pub mod momentum_velocity;
pub mod primary_trend;
pub mod short_term_trend;
pub mod trend_strength;
pub mod vol_regime;

use bollinger_reversion::BollingerReversion;
use intermediate_trend::IntermediateTrend;
use momentum_velocity::MomentumVelocity;
use primary_trend::PrimaryTrend;
use short_term_trend::ShortTermTrend;
use trend_strength::TrendStrength;
use vol_regime::VolRegime;

/// Discrete reading of a signal, reported alongside the raw score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    StrongBull,
    Bull,
    Neutral,
    Bear,
    StrongBear,
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Strength::StrongBull => "STRONG_BULL",
            Strength::Bull => "BULL",
            Strength::Neutral => "NEUTRAL",
            Strength::Bear => "BEAR",
            Strength::StrongBear => "STRONG_BEAR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    /// Bounded score in [-1.0, +1.0].
    pub raw_score: f64,
    pub strength: Strength,
    /// Fixed weight of the emitting sub-strategy, in (0, 1].
    pub weight: f64,
}

impl Signal {
    pub fn new(raw_score: f64, weight: f64) -> Self {
        let clamped = raw_score.clamp(-1.0, 1.0);
        Self {
            raw_score: clamped,
            strength: strength_from_score(clamped),
            weight,
        }
    }

    pub fn neutral(weight: f64) -> Self {
        Self {
            raw_score: 0.0,
            strength: Strength::Neutral,
            weight,
        }
    }
}

/// Score-to-strength bands shared by all sub-strategies.
pub fn strength_from_score(score: f64) -> Strength {
    if score >= 0.75 {
        Strength::StrongBull
    } else if score > 0.0 {
        Strength::Bull
    } else if score == 0.0 {
        Strength::Neutral
    } else if score > -0.5 {
        Strength::Bear
    } else {
        Strength::StrongBear
    }
}

/// Core capability every sub-strategy implements.
pub trait SubStrategy: Send + Sync {
    /// Name for logs and the session report.
    fn name(&self) -> &'static str;

    /// Fixed combination weight.
    fn weight(&self) -> f64;

    /// Map a chronological close series (oldest first, ending at the decision
    /// session) to a signal. Must be reproducible from the slice alone.
    fn compute(&self, closes: &[f64]) -> Signal;
}

/// One evaluated sub-strategy, for the session report.
#[derive(Debug, Clone)]
pub struct SignalReport {
    pub name: &'static str,
    pub signal: Signal,
}

/// The fixed sub-strategy set, in evaluation order. Weights sum to 1.0.
pub fn registry() -> Vec<Box<dyn SubStrategy>> {
    vec![
        Box::new(PrimaryTrend),
        Box::new(IntermediateTrend),
        Box::new(ShortTermTrend),
        Box::new(TrendStrength),
        Box::new(MomentumVelocity),
        Box::new(BollingerReversion),
        Box::new(VolRegime),
    ]
}

/// Evaluate every sub-strategy against the same history tail.
pub fn evaluate_all(closes: &[f64]) -> Vec<SignalReport> {
    registry()
        .iter()
        .map(|s| SignalReport {
            name: s.name(),
            signal: s.compute(closes),
        })
        .collect()
}

/// Weighted composite score. Reported, never used for allocation.
pub fn composite_score(reports: &[SignalReport]) -> f64 {
    reports
        .iter()
        .map(|r| r.signal.weight * r.signal.raw_score)
        .sum()
}
