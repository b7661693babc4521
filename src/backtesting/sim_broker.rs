// src/backtesting/sim_broker.rs
//
// In-memory broker for replay. Implements the same capability set as the
// live client so the executor code path is identical; market orders fill
// immediately and completely at the session close, with an optional uniform
// bps slippage against the trader.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::broker::{AccountSnapshot, BrokerClient, Fill, OrderSide, OrderStatus, Position};
use crate::error::EngineError;

struct SimState {
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    /// Session closes the next fills execute at.
    marks: BTreeMap<String, Decimal>,
    orders: BTreeMap<String, Fill>,
    next_order_id: u64,
}

pub struct SimBroker {
    state: Mutex<SimState>,
    slippage_bps: f64,
}

impl SimBroker {
    pub fn new(initial_cash: Decimal, slippage_bps: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                cash: initial_cash,
                positions: BTreeMap::new(),
                marks: BTreeMap::new(),
                orders: BTreeMap::new(),
                next_order_id: 1,
            }),
            slippage_bps,
        }
    }

    /// Set the close every symbol marks and fills at for the current session.
    pub fn set_marks(&self, marks: BTreeMap<String, Decimal>) {
        let mut state = self.state.lock().unwrap();
        state.marks = marks;
        // Re-mark held positions at the new closes.
        let mark_of: BTreeMap<String, Decimal> = state.marks.clone();
        for position in state.positions.values_mut() {
            if let Some(mark) = mark_of.get(&position.symbol) {
                position.market_value = Decimal::from(position.quantity) * *mark;
            }
        }
    }

    /// Fill price with slippage applied against the trader.
    fn fill_price(&self, mark: Decimal, side: OrderSide) -> Decimal {
        let slip = Decimal::from_f64(self.slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
        let price = match side {
            OrderSide::Buy => mark * (Decimal::ONE + slip),
            OrderSide::Sell => mark * (Decimal::ONE - slip),
        };
        price.round_dp(8)
    }

    fn equity_locked(state: &SimState) -> Decimal {
        state.cash
            + state
                .positions
                .values()
                .map(|p| p.market_value)
                .sum::<Decimal>()
    }

    pub fn equity(&self) -> Decimal {
        Self::equity_locked(&self.state.lock().unwrap())
    }
}

#[async_trait]
impl BrokerClient for SimBroker {
    fn name(&self) -> &str {
        "sim"
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        let state = self.state.lock().unwrap();
        Ok(AccountSnapshot {
            equity: Self::equity_locked(&state),
            cash: state.cash,
            positions: state.positions.clone(),
        })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        if quantity == 0 {
            return Err(EngineError::invariant("zero-quantity order".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let mark = *state.marks.get(symbol).ok_or_else(|| {
            EngineError::DataUnavailable(format!("no mark for {}", symbol))
        })?;
        let price = self.fill_price(mark, side);
        let order_id = format!("sim-{}", state.next_order_id);
        state.next_order_id += 1;

        let signed_quantity = quantity as i64;
        let status = match side {
            OrderSide::Sell => {
                let held = state.positions.get(symbol).map_or(0, |p| p.quantity);
                if held < signed_quantity {
                    OrderStatus::Rejected
                } else {
                    state.cash += Decimal::from(quantity) * price;
                    let position = state.positions.get_mut(symbol).unwrap();
                    position.quantity -= signed_quantity;
                    position.market_value = Decimal::from(position.quantity) * mark;
                    if position.quantity == 0 {
                        state.positions.remove(symbol);
                    }
                    OrderStatus::Filled
                }
            }
            OrderSide::Buy => {
                let cost = Decimal::from(quantity) * price;
                if cost > state.cash {
                    OrderStatus::Rejected
                } else {
                    state.cash -= cost;
                    let entry = state
                        .positions
                        .entry(symbol.to_string())
                        .or_insert_with(|| Position {
                            symbol: symbol.to_string(),
                            quantity: 0,
                            avg_cost: price,
                            market_value: Decimal::ZERO,
                        });
                    entry.quantity += signed_quantity;
                    entry.avg_cost = price;
                    entry.market_value = Decimal::from(entry.quantity) * mark;
                    OrderStatus::Filled
                }
            }
        };

        let filled = if status == OrderStatus::Filled {
            quantity
        } else {
            0
        };
        state.orders.insert(
            order_id.clone(),
            Fill {
                order_id: order_id.clone(),
                symbol: symbol.to_string(),
                side,
                filled_quantity: filled,
                avg_fill_price: price,
                status,
            },
        );
        Ok(order_id)
    }

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        let state = self.state.lock().unwrap();
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::Broker {
                broker: "sim".to_string(),
                message: format!("unknown order {}", order_id),
            })
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, EngineError> {
        // Fills are instantaneous; there is never anything in flight.
        Ok(false)
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        Ok(true)
    }
}
