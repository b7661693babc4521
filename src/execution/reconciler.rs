// src/execution/reconciler.rs
//
// Translate a fractional target allocation into integer share deltas against
// live positions. Orders below the absolute or relative thresholds are
// dropped to bound turnover; the output is deterministic: every SELL before
// every BUY, alphabetical by symbol inside each group.

use std::collections::BTreeMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::allocation::{TargetAllocation, CASH_ETF, LONG_ETF, SHORT_ETF};
use crate::broker::{AccountSnapshot, OrderSide, PlannedOrder};
use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Orders below this notional are noise; drop them.
    pub min_order_notional: Decimal,
    /// Fraction of equity a per-symbol change must exceed to trade.
    pub rebalance_threshold: f64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            min_order_notional: Decimal::new(10, 0),
            rebalance_threshold: 0.05,
        }
    }
}

/// Build the ordered trade plan for one session.
///
/// `closes` must hold the decision-session close for each instrument.
pub fn build_plan(
    target: &TargetAllocation,
    snapshot: &AccountSnapshot,
    closes: &BTreeMap<String, Decimal>,
    config: &ReconcilerConfig,
) -> Result<Vec<PlannedOrder>, EngineError> {
    target.validate()?;
    let threshold_notional = Decimal::from_f64(config.rebalance_threshold)
        .unwrap_or(Decimal::ZERO)
        * snapshot.equity;

    let mut sells = Vec::new();
    let mut buys = Vec::new();

    // BTreeMap-ordered iteration makes the alphabetical tie-break free.
    let mut symbols: Vec<&str> = vec![CASH_ETF, SHORT_ETF, LONG_ETF];
    symbols.sort_unstable();

    for symbol in symbols {
        let close = *closes.get(symbol).ok_or_else(|| {
            EngineError::DataUnavailable(format!("no close price for {}", symbol))
        })?;
        if close <= Decimal::ZERO {
            return Err(EngineError::DataUnavailable(format!(
                "non-positive close for {}",
                symbol
            )));
        }

        let target_notional = target.weight(symbol) * snapshot.equity;
        // Floor toward zero: never buy into a fraction of a share.
        let target_shares = (target_notional / close)
            .trunc()
            .to_i64()
            .ok_or_else(|| EngineError::invariant(format!("share count overflow for {}", symbol)))?;
        let delta = target_shares - snapshot.quantity(symbol);
        if delta == 0 {
            continue;
        }

        let quantity = delta.unsigned_abs();
        let notional = Decimal::from(quantity) * close;
        if notional < config.min_order_notional {
            continue;
        }
        if notional < threshold_notional {
            continue;
        }

        let order = PlannedOrder {
            symbol: symbol.to_string(),
            side: if delta < 0 { OrderSide::Sell } else { OrderSide::Buy },
            quantity,
            estimated_notional: notional,
        };
        if delta < 0 {
            sells.push(order);
        } else {
            buys.push(order);
        }
    }

    sells.extend(buys);
    Ok(sells)
}
