// Allocation state machine.
//
// Turns a MarketContext and the previous session's allocation into target
// weights over the three instruments. Weights are Decimal at 4 dp so the
// sum-to-one invariant is exact; any residual from rounding the long leg goes
// to BIL. The decision path holds no state beyond what the caller passes in.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::error::EngineError;
use crate::indicators::{realized_vol, sma};

/// 3x long leveraged index ETF.
pub const LONG_ETF: &str = "TQQQ";
/// 3x short inverse ETF, held only during the crash sprint.
pub const SHORT_ETF: &str = "SQQQ";
/// Short-duration T-bill ETF absorbing the residual weight.
pub const CASH_ETF: &str = "BIL";
/// Reference index driving every signal.
pub const INDEX_SYMBOL: &str = "NDX";

/// Weight precision in decimal places.
pub const WEIGHT_DP: u32 = 4;
/// Minimum history before the engine will produce any signal.
pub const WARMUP_BARS: usize = 260;

/// Market state at the decision session, derived entirely from bars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketContext {
    pub close: f64,
    pub sma_200: f64,
    /// Annualized 20-day realized volatility; None when undefined.
    pub realized_vol_20: Option<f64>,
    /// Consecutive sessions (including this one) with close <= SMA200.
    pub days_below_sma200: u32,
}

impl MarketContext {
    /// Build from a chronological close series ending at the decision session.
    pub fn from_closes(closes: &[f64]) -> Result<Self, EngineError> {
        if closes.len() < WARMUP_BARS {
            return Err(EngineError::DataUnavailable(format!(
                "need {} bars of history, have {}",
                WARMUP_BARS,
                closes.len()
            )));
        }
        let close = *closes.last().unwrap();
        let sma_200 = sma(closes, 200).ok_or_else(|| {
            EngineError::DataUnavailable("insufficient history for SMA200".to_string())
        })?;
        Ok(Self {
            close,
            sma_200,
            realized_vol_20: realized_vol(closes, 20),
            days_below_sma200: days_below_sma200(closes),
        })
    }
}

/// Count of consecutive sessions, ending at the last close, on which the
/// close sat at or below its 200-day SMA. Resets on any close above it.
pub fn days_below_sma200(closes: &[f64]) -> u32 {
    let mut count = 0u32;
    let mut end = closes.len();
    while end >= 200 {
        let window = &closes[..end];
        let avg = match sma(window, 200) {
            Some(a) => a,
            None => break,
        };
        if window[end - 1] <= avg {
            count += 1;
            end -= 1;
        } else {
            break;
        }
    }
    count
}

/// Target weights over the three instruments. Always sums to exactly 1 and
/// never holds both leveraged legs at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetAllocation {
    pub tqqq: Decimal,
    pub sqqq: Decimal,
    pub bil: Decimal,
}

impl TargetAllocation {
    pub fn all_cash() -> Self {
        Self {
            tqqq: Decimal::ZERO,
            sqqq: Decimal::ZERO,
            bil: Decimal::ONE,
        }
    }

    /// Build from the leveraged legs; BIL takes the exact remainder.
    pub fn from_legs(tqqq: Decimal, sqqq: Decimal) -> Self {
        let tqqq = tqqq.round_dp(WEIGHT_DP);
        let sqqq = sqqq.round_dp(WEIGHT_DP);
        Self {
            tqqq,
            sqqq,
            bil: Decimal::ONE - tqqq - sqqq,
        }
    }

    pub fn weight(&self, symbol: &str) -> Decimal {
        match symbol {
            LONG_ETF => self.tqqq,
            SHORT_ETF => self.sqqq,
            CASH_ETF => self.bil,
            _ => Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let sum = self.tqqq + self.sqqq + self.bil;
        if sum != Decimal::ONE {
            return Err(EngineError::invariant(format!(
                "weights sum to {} instead of 1",
                sum
            )));
        }
        for (name, w) in [
            (LONG_ETF, self.tqqq),
            (SHORT_ETF, self.sqqq),
            (CASH_ETF, self.bil),
        ] {
            if w < Decimal::ZERO || w > Decimal::ONE {
                return Err(EngineError::invariant(format!(
                    "{} weight {} outside [0, 1]",
                    name, w
                )));
            }
        }
        if self.tqqq > Decimal::ZERO && self.sqqq > Decimal::ZERO {
            return Err(EngineError::invariant(
                "long and short legs held simultaneously".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which nominal state produced the weights. Telemetry for logs, alerts,
/// and the replay trade list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// Volatility-targeted TQQQ exposure.
    Long,
    /// Bounded SQQQ crash sprint.
    Sprint,
    /// No leveraged exposure under the normal rules.
    Cash,
    /// One-session flip-to-cash between opposite leveraged legs.
    Transition,
}

impl std::fmt::Display for AllocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AllocationState::Long => "LONG",
            AllocationState::Sprint => "SPRINT",
            AllocationState::Cash => "CASH",
            AllocationState::Transition => "TRANSITION",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationDecision {
    pub allocation: TargetAllocation,
    pub state: AllocationState,
}

/// The volatility-target + sprint + no-flip combiner.
#[derive(Debug, Clone, Copy)]
pub struct Combiner {
    pub target_vol: f64,
    pub sprint_vol_threshold: f64,
    pub sprint_max_days: u32,
}

/// Sprint allocation: 30% SQQQ, 70% BIL.
const SPRINT_SHORT_WEIGHT: Decimal = Decimal::from_parts(3000, 0, 0, false, 4);

impl Default for Combiner {
    fn default() -> Self {
        Self {
            target_vol: 0.20,
            sprint_vol_threshold: 0.25,
            sprint_max_days: 15,
        }
    }
}

impl Combiner {
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self {
            target_vol: config.target_vol,
            sprint_vol_threshold: config.sprint_vol_threshold,
            sprint_max_days: config.sprint_max_days,
        }
    }

    /// Evaluate the allocation rules for one session.
    ///
    /// Rule 1 sizes TQQQ to the volatility target; Rule 2 overrides with the
    /// SQQQ sprint inside the first `sprint_max_days` sessions below the
    /// SMA200; Rule 3 forces one all-cash session between opposite leveraged
    /// legs; Rule 4 hands the remainder to BIL.
    pub fn combine(
        &self,
        context: &MarketContext,
        previous: &TargetAllocation,
    ) -> Result<AllocationDecision, EngineError> {
        let vol = context.realized_vol_20;
        let sprint_armed = context.close < context.sma_200
            && vol.map_or(false, |v| v >= self.sprint_vol_threshold)
            && context.days_below_sma200 >= 1
            && context.days_below_sma200 <= self.sprint_max_days;

        let decision = if sprint_armed {
            if previous.tqqq > Decimal::ZERO {
                // Rule 3: no direct long -> short flip.
                AllocationDecision {
                    allocation: TargetAllocation::all_cash(),
                    state: AllocationState::Transition,
                }
            } else {
                AllocationDecision {
                    allocation: TargetAllocation::from_legs(
                        Decimal::ZERO,
                        SPRINT_SHORT_WEIGHT,
                    ),
                    state: AllocationState::Sprint,
                }
            }
        } else {
            let base = match vol {
                Some(v) if v > 0.0 => (self.target_vol / v).min(1.0),
                // Undefined or zero volatility takes the full long weight.
                _ => 1.0,
            };
            let long_weight = Decimal::from_f64(base)
                .unwrap_or(Decimal::ZERO)
                .round_dp(WEIGHT_DP)
                .clamp(Decimal::ZERO, Decimal::ONE);
            if long_weight > Decimal::ZERO && previous.sqqq > Decimal::ZERO {
                // Rule 3: no direct short -> long flip.
                AllocationDecision {
                    allocation: TargetAllocation::all_cash(),
                    state: AllocationState::Transition,
                }
            } else if long_weight.is_zero() {
                AllocationDecision {
                    allocation: TargetAllocation::all_cash(),
                    state: AllocationState::Cash,
                }
            } else {
                AllocationDecision {
                    allocation: TargetAllocation::from_legs(long_weight, Decimal::ZERO),
                    state: AllocationState::Long,
                }
            }
        };

        decision.allocation.validate()?;
        Ok(decision)
    }
}
