// Executor contract tests against a scripted broker: ordering, partial
// fills, proportional buy reduction, failover, deadline, and dry-run.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use whitelight::broker::{
    AccountSnapshot, BrokerClient, Fill, OrderSide, OrderStatus, PlannedOrder,
};
use whitelight::error::EngineError;
use whitelight::execution::{ExecutionOutcome, Executor, ExecutorConfig};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn order(symbol: &str, side: OrderSide, quantity: u64, notional: &str) -> PlannedOrder {
    PlannedOrder {
        symbol: symbol.to_string(),
        side,
        quantity,
        estimated_notional: dec(notional),
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_base_secs: 0.001,
        retry_max_attempts: 5,
        safety_margin: 0.02,
        poll_interval_ms: 1,
        dry_run: false,
    }
}

/// Scripted outcomes per submission, shared across both test venues.
enum SubmitScript {
    /// Accept and fill this quantity with this terminal status.
    Fill(u64, OrderStatus, Decimal),
    Error(fn() -> EngineError),
}

struct ScriptedBroker {
    name: String,
    submissions: Mutex<VecDeque<SubmitScript>>,
    /// (side, symbol) per accepted submission, for ordering assertions.
    log: Mutex<Vec<(OrderSide, String)>>,
    fills: Mutex<Vec<Fill>>,
    cash: Decimal,
    cancels: Mutex<usize>,
}

impl ScriptedBroker {
    fn new(name: &str, cash: &str, script: Vec<SubmitScript>) -> Self {
        Self {
            name: name.to_string(),
            submissions: Mutex::new(script.into()),
            log: Mutex::new(Vec::new()),
            fills: Mutex::new(Vec::new()),
            cash: dec(cash),
            cancels: Mutex::new(0),
        }
    }

    fn submitted(&self) -> Vec<(OrderSide, String)> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerClient for ScriptedBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        Ok(AccountSnapshot {
            equity: self.cash,
            cash: self.cash,
            positions: Default::default(),
        })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        let script = self
            .submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitScript::Fill(0, OrderStatus::Rejected, Decimal::ZERO));
        match script {
            SubmitScript::Error(make) => Err(make()),
            SubmitScript::Fill(filled, status, price) => {
                self.log.lock().unwrap().push((side, symbol.to_string()));
                let mut fills = self.fills.lock().unwrap();
                let order_id = format!("{}-{}", self.name, fills.len() + 1);
                fills.push(Fill {
                    order_id: order_id.clone(),
                    symbol: symbol.to_string(),
                    side,
                    filled_quantity: filled.min(quantity),
                    avg_fill_price: price,
                    status,
                });
                Ok(order_id)
            }
        }
    }

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        self.fills
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.order_id == order_id)
            .cloned()
            .ok_or_else(|| EngineError::Broker {
                broker: self.name.clone(),
                message: format!("unknown order {}", order_id),
            })
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, EngineError> {
        *self.cancels.lock().unwrap() += 1;
        Ok(true)
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        Ok(true)
    }
}

fn connectivity_error() -> EngineError {
    EngineError::BrokerConnectivity {
        broker: "primary".to_string(),
        message: "connection refused".to_string(),
    }
}

fn far_deadline() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::hours(6)
}

#[tokio::test]
async fn test_sells_submitted_before_buys() {
    let broker = ScriptedBroker::new(
        "primary",
        "100000",
        vec![
            SubmitScript::Fill(100, OrderStatus::Filled, dec("50")),
            SubmitScript::Fill(500, OrderStatus::Filled, dec("91.5")),
            SubmitScript::Fill(10, OrderStatus::Filled, dec("15")),
        ],
    );
    let plan = vec![
        order("TQQQ", OrderSide::Sell, 100, "5000"),
        order("BIL", OrderSide::Buy, 500, "45750"),
        order("SQQQ", OrderSide::Buy, 10, "150"),
    ];
    let executor = Executor::new(&broker, None, fast_config());
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    let log = broker.submitted();
    let first_buy = log.iter().position(|(s, _)| *s == OrderSide::Buy).unwrap();
    assert!(log[..first_buy].iter().all(|(s, _)| *s == OrderSide::Sell));
    assert_eq!(report.fills.len(), 3);
}

#[tokio::test]
async fn test_partial_sell_shrinks_buys_to_actual_cash() {
    // A 100-share sell fills only 60; the broker then reports
    // $3000 cash, and the planned $9150 buy is scaled down to fit.
    let broker = ScriptedBroker::new(
        "primary",
        "3000",
        vec![
            SubmitScript::Fill(60, OrderStatus::Partial, dec("50")),
            SubmitScript::Fill(u64::MAX, OrderStatus::Filled, dec("91.5")),
        ],
    );
    let plan = vec![
        order("TQQQ", OrderSide::Sell, 100, "5000"),
        order("BIL", OrderSide::Buy, 100, "9150"),
    ];
    let executor = Executor::new(&broker, None, fast_config());
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    let sell_fill = &report.fills[0];
    assert_eq!(sell_fill.filled_quantity, 60);
    assert_eq!(sell_fill.status, OrderStatus::Partial);

    // spendable = 3000 * 0.98 = 2940; scale = 2940/9150; floor(100*scale) = 32.
    let buy = report
        .submitted
        .iter()
        .find(|o| o.side == OrderSide::Buy)
        .unwrap();
    assert_eq!(buy.quantity, 32);
}

#[tokio::test]
async fn test_failover_after_two_connectivity_errors() {
    let primary = ScriptedBroker::new(
        "primary",
        "100000",
        vec![
            SubmitScript::Error(connectivity_error),
            SubmitScript::Error(connectivity_error),
        ],
    );
    let secondary = ScriptedBroker::new(
        "secondary",
        "100000",
        vec![SubmitScript::Fill(100, OrderStatus::Filled, dec("50"))],
    );
    let plan = vec![order("TQQQ", OrderSide::Sell, 100, "5000")];
    let executor = Executor::new(&primary, Some(&secondary), fast_config());
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    assert!(report.failover_used);
    assert!(primary.submitted().is_empty());
    assert_eq!(secondary.submitted().len(), 1);
    assert_eq!(report.fills[0].filled_quantity, 100);
}

#[tokio::test]
async fn test_no_failover_without_secondary() {
    let primary = ScriptedBroker::new(
        "primary",
        "100000",
        vec![
            SubmitScript::Error(connectivity_error),
            SubmitScript::Error(connectivity_error),
            SubmitScript::Error(connectivity_error),
            SubmitScript::Error(connectivity_error),
            SubmitScript::Error(connectivity_error),
        ],
    );
    let plan = vec![order("TQQQ", OrderSide::Sell, 100, "5000")];
    let executor = Executor::new(&primary, None, fast_config());
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert!(matches!(report.outcome, ExecutionOutcome::BrokerFailure(_)));
    assert!(report.fills.is_empty());
}

#[tokio::test]
async fn test_rejected_order_skipped_plan_continues() {
    let broker = ScriptedBroker::new(
        "primary",
        "100000",
        vec![
            SubmitScript::Error(|| EngineError::OrderRejected {
                symbol: "TQQQ".to_string(),
                reason: "symbol halted".to_string(),
            }),
            SubmitScript::Fill(10, OrderStatus::Filled, dec("91.5")),
        ],
    );
    let plan = vec![
        order("TQQQ", OrderSide::Sell, 100, "5000"),
        order("BIL", OrderSide::Buy, 10, "915"),
    ];
    let executor = Executor::new(&broker, None, fast_config());
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Completed);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.fills.len(), 1);
    assert_eq!(report.fills[0].symbol, "BIL");
}

#[tokio::test]
async fn test_expired_deadline_aborts_without_submitting() {
    let broker = ScriptedBroker::new(
        "primary",
        "100000",
        vec![SubmitScript::Fill(100, OrderStatus::Filled, dec("50"))],
    );
    let plan = vec![order("TQQQ", OrderSide::Sell, 100, "5000")];
    let executor = Executor::new(&broker, None, fast_config());
    let deadline = Utc::now() - Duration::seconds(1);
    let report = executor.execute(&plan, deadline).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::DeadlineMissed);
    assert!(broker.submitted().is_empty());
    assert!(report.fills.is_empty());
}

#[tokio::test]
async fn test_dry_run_submits_nothing() {
    let broker = ScriptedBroker::new("primary", "100000", vec![]);
    let plan = vec![
        order("TQQQ", OrderSide::Sell, 100, "5000"),
        order("BIL", OrderSide::Buy, 10, "915"),
    ];
    let config = ExecutorConfig {
        dry_run: true,
        ..fast_config()
    };
    let executor = Executor::new(&broker, None, config);
    let report = executor.execute(&plan, far_deadline()).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.submitted.len(), 2);
    assert!(report.fills.is_empty());
    assert!(broker.submitted().is_empty());
}
