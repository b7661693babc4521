// Brokerage capability and account domain types.
//
// Quantities are whole shares; cash, prices, and notionals are Decimal.
// The same capability set is implemented by the live HTTP client (primary and
// secondary endpoints) and by the replay's simulated broker.

pub mod alpaca;

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::allocation::{TargetAllocation, LONG_ETF, SHORT_ETF, WEIGHT_DP};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("BUY"),
            OrderSide::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
    Canceled,
    /// Accepted but not yet terminal; keep polling.
    Pending,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// Latest known state of one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_quantity: u64,
    pub avg_fill_price: Decimal,
    pub status: OrderStatus,
}

/// One held instrument. Quantity is whole shares; shorting is never used
/// (downside exposure is taken via the inverse ETF).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: Decimal,
    pub market_value: Decimal,
}

/// Read-through snapshot of the account; the broker stays authoritative.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub cash: Decimal,
    pub positions: BTreeMap<String, Position>,
}

impl AccountSnapshot {
    pub fn quantity(&self, symbol: &str) -> i64 {
        self.positions.get(symbol).map_or(0, |p| p.quantity)
    }

    /// Reconstruct the previous session's allocation from live positions.
    ///
    /// Holding SQQQ implies yesterday's allocation had a short leg, and so
    /// on; the engine persists nothing between runs. Magnitudes are
    /// market-value weights at 4 dp with the residual on BIL; the no-flip
    /// rule only consumes the signs.
    pub fn derive_previous_allocation(&self) -> TargetAllocation {
        if self.equity <= Decimal::ZERO {
            return TargetAllocation::all_cash();
        }
        let weight_of = |symbol: &str| -> Decimal {
            self.positions
                .get(symbol)
                .map(|p| (p.market_value / self.equity).round_dp(WEIGHT_DP))
                .unwrap_or(Decimal::ZERO)
                .clamp(Decimal::ZERO, Decimal::ONE)
        };
        let tqqq = weight_of(LONG_ETF);
        let sqqq = weight_of(SHORT_ETF);
        if tqqq >= sqqq {
            TargetAllocation::from_legs(tqqq, Decimal::ZERO)
        } else {
            TargetAllocation::from_legs(Decimal::ZERO, sqqq)
        }
    }
}

/// An order the reconciler wants executed. Quantity is always positive; the
/// side carries the direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub estimated_notional: Decimal,
}

impl PlannedOrder {
    /// Estimated per-share price backing the notional.
    pub fn estimated_price(&self) -> Decimal {
        if self.quantity == 0 {
            return Decimal::ZERO;
        }
        self.estimated_notional / Decimal::from(self.quantity)
    }
}

/// Brokerage capability set. Implementations must expose identical
/// semantics so the executor can fail over between them mid-plan.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn name(&self) -> &str;

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError>;

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError>;

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError>;

    async fn is_market_open(&self) -> Result<bool, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::CASH_ETF;

    fn position(symbol: &str, quantity: i64, market_value: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity,
            avg_cost: Decimal::ZERO,
            market_value: market_value.parse().unwrap(),
        }
    }

    fn snapshot(equity: &str, positions: Vec<Position>) -> AccountSnapshot {
        AccountSnapshot {
            equity: equity.parse().unwrap(),
            cash: Decimal::ZERO,
            positions: positions
                .into_iter()
                .map(|p| (p.symbol.clone(), p))
                .collect(),
        }
    }

    #[test]
    fn test_previous_allocation_from_long_position() {
        let snap = snapshot("100000", vec![position(LONG_ETF, 500, "90000")]);
        let previous = snap.derive_previous_allocation();
        assert_eq!(previous.tqqq, "0.9".parse().unwrap());
        assert_eq!(previous.sqqq, Decimal::ZERO);
    }

    #[test]
    fn test_previous_allocation_from_short_position() {
        let snap = snapshot("100000", vec![position(SHORT_ETF, 400, "30000")]);
        let previous = snap.derive_previous_allocation();
        assert_eq!(previous.sqqq, "0.3".parse().unwrap());
        assert_eq!(previous.tqqq, Decimal::ZERO);
        assert_eq!(previous.weight(CASH_ETF), "0.7".parse().unwrap());
    }

    #[test]
    fn test_previous_allocation_flat_account_is_cash() {
        let snap = snapshot("100000", vec![]);
        assert_eq!(snap.derive_previous_allocation(), TargetAllocation::all_cash());
    }

    #[test]
    fn test_planned_order_price() {
        let order = PlannedOrder {
            symbol: LONG_ETF.to_string(),
            side: OrderSide::Buy,
            quantity: 40,
            estimated_notional: "2000".parse().unwrap(),
        };
        assert_eq!(order.estimated_price(), "50".parse().unwrap());
    }
}
