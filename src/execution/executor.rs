// src/execution/executor.rs
//
// Order execution against the brokerage capability. The contract:
//
//   1. SELLs go out first, one at a time, each polled to a terminal state.
//   2. Cash is re-read from the broker so partial sell fills shrink the
//      buying power before any BUY is sized.
//   3. BUYs are scaled proportionally (floor) to fit available cash less the
//      safety margin, then submitted sequentially.
//   4. Transient failures back off exponentially (base 2s, factor 2, ±25%
//      jitter, 60s cap, 5 attempts) and never sleep past the deadline.
//   5. Two consecutive connectivity failures on one order switch the rest of
//      the plan to the secondary venue. Never both venues in parallel.
//
// Dry-run stops before submission and reports the plan untouched.

use chrono::{DateTime, Utc};
use log::{info, warn};
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::broker::{BrokerClient, Fill, OrderSide, OrderStatus, PlannedOrder};
use crate::error::EngineError;

const BACKOFF_CAP_SECS: f64 = 60.0;
const JITTER: f64 = 0.25;
/// Consecutive connectivity failures on one order before failover.
const FAILOVER_AFTER: u32 = 2;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub retry_base_secs: f64,
    pub retry_max_attempts: u32,
    pub safety_margin: f64,
    pub poll_interval_ms: u64,
    pub dry_run: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_base_secs: 2.0,
            retry_max_attempts: 5,
            safety_margin: 0.02,
            poll_interval_ms: 500,
            dry_run: false,
        }
    }
}

/// How the session's execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    /// The deadline passed; in-flight orders were cancelled best-effort and
    /// the remainder of the plan was abandoned.
    DeadlineMissed,
    /// Every retry (and the secondary venue, if configured) failed.
    BrokerFailure(String),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The plan as adjusted (buy scaling) and attempted.
    pub submitted: Vec<PlannedOrder>,
    pub fills: Vec<Fill>,
    /// Orders dropped with the reason (rejection, no cash, deadline).
    pub skipped: Vec<(PlannedOrder, String)>,
    pub outcome: ExecutionOutcome,
    pub failover_used: bool,
    pub dry_run: bool,
}

impl ExecutionReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == ExecutionOutcome::Completed
    }
}

enum OrderResult {
    Terminal(Fill),
    Skipped(String),
    DeadlineHit,
    Exhausted(String),
}

pub struct Executor<'a> {
    primary: &'a dyn BrokerClient,
    secondary: Option<&'a dyn BrokerClient>,
    config: ExecutorConfig,
}

impl<'a> Executor<'a> {
    pub fn new(
        primary: &'a dyn BrokerClient,
        secondary: Option<&'a dyn BrokerClient>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
        }
    }

    /// Run the plan. The plan must already be ordered sells-then-buys.
    pub async fn execute(
        &self,
        plan: &[PlannedOrder],
        deadline: DateTime<Utc>,
    ) -> Result<ExecutionReport, EngineError> {
        let mut report = ExecutionReport {
            submitted: Vec::new(),
            fills: Vec::new(),
            skipped: Vec::new(),
            outcome: ExecutionOutcome::Completed,
            failover_used: false,
            dry_run: self.config.dry_run,
        };

        if self.config.dry_run {
            for order in plan {
                info!(
                    "dry-run: would {} {} {} (~${})",
                    order.side, order.quantity, order.symbol, order.estimated_notional
                );
            }
            report.submitted = plan.to_vec();
            return Ok(report);
        }

        let sells: Vec<&PlannedOrder> = plan.iter().filter(|o| o.side == OrderSide::Sell).collect();
        let buys: Vec<&PlannedOrder> = plan.iter().filter(|o| o.side == OrderSide::Buy).collect();

        // Tracks which venue the rest of the plan uses after a failover.
        let mut on_secondary = false;

        // Phase 1: sells, sequentially, each to a terminal state.
        for order in sells {
            match self
                .run_order(order, deadline, &mut on_secondary, &mut report)
                .await
            {
                ControlFlow::Continue => {}
                ControlFlow::Abort => return Ok(report),
            }
        }

        if buys.is_empty() {
            return Ok(report);
        }

        // Phase 2: re-read cash so partial sell fills are absorbed.
        let broker = self.active(on_secondary);
        let cash = match broker.get_account().await {
            Ok(snapshot) => snapshot.cash,
            Err(e) => {
                warn!("cash re-read failed, falling back to fill proceeds: {}", e);
                self.estimate_cash_from_fills(&report)
            }
        };

        // Phase 3: scale buys proportionally (floor) into the spendable cash.
        let spendable = cash
            * (Decimal::ONE
                - Decimal::from_f64(self.config.safety_margin).unwrap_or(Decimal::ZERO));
        let scaled = scale_buys_to_cash(&buys, spendable);
        for (order, original) in scaled.iter().zip(buys.iter()) {
            if order.quantity == 0 {
                report.skipped.push((
                    (*original).clone(),
                    "insufficient cash after sells".to_string(),
                ));
                continue;
            }
            if order.quantity < original.quantity {
                info!(
                    "buy {} reduced {} -> {} shares to fit ${} spendable",
                    order.symbol, original.quantity, order.quantity, spendable
                );
            }
            match self
                .run_order(order, deadline, &mut on_secondary, &mut report)
                .await
            {
                ControlFlow::Continue => {}
                ControlFlow::Abort => return Ok(report),
            }
        }

        Ok(report)
    }

    fn active(&self, on_secondary: bool) -> &dyn BrokerClient {
        if on_secondary {
            self.secondary.unwrap_or(self.primary)
        } else {
            self.primary
        }
    }

    /// Cash proceeds actually realized by sell fills, as a fallback when the
    /// account endpoint is unreachable right after the sell phase.
    fn estimate_cash_from_fills(&self, report: &ExecutionReport) -> Decimal {
        report
            .fills
            .iter()
            .filter(|f| f.side == OrderSide::Sell)
            .map(|f| Decimal::from(f.filled_quantity) * f.avg_fill_price)
            .sum()
    }

    async fn run_order(
        &self,
        order: &PlannedOrder,
        deadline: DateTime<Utc>,
        on_secondary: &mut bool,
        report: &mut ExecutionReport,
    ) -> ControlFlow {
        report.submitted.push(order.clone());
        let result = self.submit_and_poll(order, deadline, on_secondary).await;
        report.failover_used |= *on_secondary;
        match result {
            OrderResult::Terminal(fill) => {
                if fill.status == OrderStatus::Rejected || fill.status == OrderStatus::Canceled {
                    warn!(
                        "order {} {} {} ended {:?}",
                        order.side, order.quantity, order.symbol, fill.status
                    );
                    report
                        .skipped
                        .push((order.clone(), format!("terminal status {:?}", fill.status)));
                } else {
                    info!(
                        "order {} {} {} filled {}@{}",
                        order.side,
                        order.quantity,
                        order.symbol,
                        fill.filled_quantity,
                        fill.avg_fill_price
                    );
                }
                if fill.filled_quantity > 0 {
                    report.fills.push(fill);
                }
                ControlFlow::Continue
            }
            OrderResult::Skipped(reason) => {
                warn!("order {} {} skipped: {}", order.side, order.symbol, reason);
                report.skipped.push((order.clone(), reason));
                ControlFlow::Continue
            }
            OrderResult::DeadlineHit => {
                warn!("deadline reached; abandoning remaining plan");
                report.outcome = ExecutionOutcome::DeadlineMissed;
                ControlFlow::Abort
            }
            OrderResult::Exhausted(message) => {
                report.outcome = ExecutionOutcome::BrokerFailure(message);
                ControlFlow::Abort
            }
        }
    }

    async fn submit_and_poll(
        &self,
        order: &PlannedOrder,
        deadline: DateTime<Utc>,
        on_secondary: &mut bool,
    ) -> OrderResult {
        let mut consecutive_connectivity = 0u32;
        let mut last_error = String::new();

        for attempt in 1..=self.config.retry_max_attempts {
            if Utc::now() >= deadline {
                return OrderResult::DeadlineHit;
            }
            let broker = self.active(*on_secondary);

            let submitted = broker
                .submit_market_order(&order.symbol, order.side, order.quantity)
                .await;
            let error = match submitted {
                // Once the order is live it is never re-submitted; polling
                // retries its own transients and cancels on give-up.
                Ok(order_id) => {
                    return self.poll_to_terminal(broker, &order_id, order, deadline).await
                }
                Err(e) => e,
            };

            // Non-transient failures are final for this order; the rest of
            // the plan still runs.
            if !error.is_transient() {
                return OrderResult::Skipped(error.to_string());
            }

            if error.is_connectivity() {
                consecutive_connectivity += 1;
            } else {
                consecutive_connectivity = 0;
            }
            last_error = error.to_string();

            if consecutive_connectivity >= FAILOVER_AFTER
                && !*on_secondary
                && self.secondary.is_some()
            {
                warn!(
                    "{} unreachable twice; failing over to {}",
                    self.primary.name(),
                    self.secondary.unwrap().name()
                );
                *on_secondary = true;
                consecutive_connectivity = 0;
                continue; // retry immediately on the new venue
            }

            if attempt == self.config.retry_max_attempts {
                break;
            }
            let delay = self.backoff_delay(attempt);
            if Utc::now() + chrono::Duration::milliseconds((delay * 1000.0) as i64) >= deadline {
                return OrderResult::DeadlineHit;
            }
            tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }

        OrderResult::Exhausted(last_error)
    }

    /// Poll until the order reaches a terminal state or the deadline hits.
    /// On deadline, cancel best-effort and report whatever filled. Poll
    /// transients retry in place; the order is never re-submitted.
    async fn poll_to_terminal(
        &self,
        broker: &dyn BrokerClient,
        order_id: &str,
        order: &PlannedOrder,
        deadline: DateTime<Utc>,
    ) -> OrderResult {
        let mut last_fill: Option<Fill> = None;
        let mut consecutive_errors = 0u32;
        loop {
            if Utc::now() >= deadline {
                let cancelled = broker.cancel_order(order_id).await.unwrap_or(false);
                warn!(
                    "deadline during {} {}: cancel {}",
                    order.side,
                    order.symbol,
                    if cancelled { "sent" } else { "failed" }
                );
                // Retain whatever quantity already filled.
                if let Some(fill) = last_fill.filter(|f| f.filled_quantity > 0) {
                    return OrderResult::Terminal(fill);
                }
                return OrderResult::DeadlineHit;
            }

            match broker.poll_order(order_id).await {
                Ok(fill) => {
                    consecutive_errors = 0;
                    if fill.status.is_terminal() {
                        return OrderResult::Terminal(fill);
                    }
                    last_fill = Some(fill);
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    if consecutive_errors >= self.config.retry_max_attempts {
                        let _ = broker.cancel_order(order_id).await;
                        return OrderResult::Skipped(format!(
                            "order state unknown after {} poll failures: {}",
                            consecutive_errors, e
                        ));
                    }
                }
                Err(e) => {
                    let _ = broker.cancel_order(order_id).await;
                    return OrderResult::Skipped(e.to_string());
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(self.config.poll_interval_ms))
                .await;
        }
    }

    /// Exponential backoff with ±25% jitter, capped at 60s.
    fn backoff_delay(&self, attempt: u32) -> f64 {
        let base = self.config.retry_base_secs * 2f64.powi(attempt as i32 - 1);
        let capped = base.min(BACKOFF_CAP_SECS);
        let jitter = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        capped * jitter
    }
}

enum ControlFlow {
    Continue,
    Abort,
}

/// Scale buy quantities proportionally (floor) so their combined notional
/// fits the spendable cash. Quantities can reach zero.
fn scale_buys_to_cash(buys: &[&PlannedOrder], spendable: Decimal) -> Vec<PlannedOrder> {
    let total: Decimal = buys.iter().map(|o| o.estimated_notional).sum();
    if total <= spendable || total.is_zero() {
        return buys.iter().map(|o| (*o).clone()).collect();
    }
    let scale = spendable.max(Decimal::ZERO) / total;
    buys.iter()
        .map(|order| {
            let scaled_quantity = (Decimal::from(order.quantity) * scale)
                .trunc()
                .to_u64()
                .unwrap_or(0);
            PlannedOrder {
                symbol: order.symbol.clone(),
                side: order.side,
                quantity: scaled_quantity,
                estimated_notional: Decimal::from(scaled_quantity) * order.estimated_price(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(symbol: &str, side: OrderSide, quantity: u64, notional: &str) -> PlannedOrder {
        PlannedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
            estimated_notional: notional.parse().unwrap(),
        }
    }

    #[test]
    fn test_buy_scaling_fits_cash() {
        let a = order("BIL", OrderSide::Buy, 100, "9150");
        let b = order("TQQQ", OrderSide::Buy, 200, "10000");
        let buys = vec![&a, &b];
        let scaled = scale_buys_to_cash(&buys, "9575".parse().unwrap());
        // Half the cash for the combined 19150 notional: quantities halve.
        assert_eq!(scaled[0].quantity, 50);
        assert_eq!(scaled[1].quantity, 100);
        let spent: Decimal = scaled.iter().map(|o| o.estimated_notional).sum();
        assert!(spent <= "9575".parse().unwrap());
    }

    #[test]
    fn test_buy_scaling_noop_when_cash_suffices() {
        let a = order("TQQQ", OrderSide::Buy, 10, "500");
        let buys = vec![&a];
        let scaled = scale_buys_to_cash(&buys, "10000".parse().unwrap());
        assert_eq!(scaled[0].quantity, 10);
    }

    #[test]
    fn test_buy_scaling_floors_to_zero() {
        let a = order("TQQQ", OrderSide::Buy, 1, "50");
        let buys = vec![&a];
        let scaled = scale_buys_to_cash(&buys, "10".parse().unwrap());
        assert_eq!(scaled[0].quantity, 0);
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let executor_config = ExecutorConfig::default();
        // Construct a throwaway executor over a null broker just for delays.
        struct Null;
        #[async_trait::async_trait]
        impl BrokerClient for Null {
            fn name(&self) -> &str {
                "null"
            }
            async fn get_account(
                &self,
            ) -> Result<crate::broker::AccountSnapshot, EngineError> {
                unreachable!()
            }
            async fn submit_market_order(
                &self,
                _: &str,
                _: OrderSide,
                _: u64,
            ) -> Result<String, EngineError> {
                unreachable!()
            }
            async fn poll_order(&self, _: &str) -> Result<Fill, EngineError> {
                unreachable!()
            }
            async fn cancel_order(&self, _: &str) -> Result<bool, EngineError> {
                unreachable!()
            }
            async fn is_market_open(&self) -> Result<bool, EngineError> {
                unreachable!()
            }
        }
        let null = Null;
        let executor = Executor::new(&null, None, executor_config);
        for attempt in 1..=8 {
            let delay = executor.backoff_delay(attempt);
            let nominal = (2.0 * 2f64.powi(attempt as i32 - 1)).min(60.0);
            assert!(delay >= nominal * 0.75 - 1e-9);
            assert!(delay <= nominal * 1.25 + 1e-9);
        }
    }
}
