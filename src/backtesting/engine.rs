// Backtesting engine - drives the live decision path day-by-day.
//
// The replay uses the same Combiner, Reconciler, and Executor as a live
// session, pointed at a SimBroker that fills at the session close. Given
// identical bars and config, two runs produce identical output: there is no
// randomness on this path (retry jitter never engages because the simulated
// broker never fails transiently).

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use log::{debug, info};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use super::metrics::{BacktestResult, DailyRecord, EquityCurve, SummaryMetrics, TradeRecord};
use super::sim_broker::SimBroker;
use crate::broker::BrokerClient;
use crate::allocation::{
    Combiner, MarketContext, TargetAllocation, CASH_ETF, INDEX_SYMBOL, LONG_ETF, SHORT_ETF,
    WARMUP_BARS,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::execution::{build_plan, Executor, ExecutorConfig, ReconcilerConfig};
use crate::market_data::{align_calendar, PriceHistory};
use crate::signals::{composite_score, evaluate_all};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: Decimal,
    pub slippage_bps: f64,
    pub bil_apr: f64,
}

pub struct BacktestEngine {
    config: BacktestConfig,
    combiner: Combiner,
    reconciler_config: ReconcilerConfig,
}

/// Open position episode while walking the calendar.
struct OpenEpisode {
    entry_date: NaiveDate,
    entry_index: usize,
    cash_in: Decimal,
    cash_out: Decimal,
}

impl BacktestEngine {
    pub fn new(engine_config: &EngineConfig, config: BacktestConfig) -> Self {
        Self {
            config,
            combiner: Combiner::from_config(engine_config),
            reconciler_config: ReconcilerConfig {
                min_order_notional: engine_config.min_order_notional,
                rebalance_threshold: engine_config.rebalance_threshold,
            },
        }
    }

    /// Replay over cached histories. Bars before `start` supply the warm-up;
    /// the first decision lands 260 bars into the aligned calendar and not
    /// before `start`.
    pub async fn run(
        &self,
        histories: &BTreeMap<String, PriceHistory>,
    ) -> Result<BacktestResult, EngineError> {
        for required in [INDEX_SYMBOL, LONG_ETF, SHORT_ETF] {
            if !histories.contains_key(required) {
                return Err(EngineError::DataUnavailable(format!(
                    "missing history for {}",
                    required
                )));
            }
        }
        let have_bil_series = histories.contains_key(CASH_ETF);
        let calendar = align_calendar(histories)?;
        if calendar.is_empty() {
            return Err(EngineError::DataUnavailable(
                "histories share no overlapping sessions".to_string(),
            ));
        }
        let range = (calendar[0], *calendar.last().unwrap());

        // Trim every history to the aligned range so calendar indices line
        // up across symbols.
        let closes_in_range = |symbol: &str| -> Vec<Decimal> {
            histories[symbol]
                .bars()
                .iter()
                .filter(|b| b.date >= range.0 && b.date <= range.1)
                .map(|b| b.close)
                .collect()
        };
        let ndx_closes_all: Vec<f64> = closes_in_range(INDEX_SYMBOL)
            .iter()
            .map(|d| d.to_f64().unwrap_or(0.0))
            .collect();
        let tqqq_closes = closes_in_range(LONG_ETF);
        let sqqq_closes = closes_in_range(SHORT_ETF);
        let bil_closes = if have_bil_series {
            closes_in_range(CASH_ETF)
        } else {
            Vec::new()
        };

        let first_decision = (0..calendar.len())
            .position(|i| i >= WARMUP_BARS && calendar[i] >= self.config.start)
            .ok_or_else(|| {
                EngineError::DataUnavailable(format!(
                    "no tradable session on or after {} with {} bars of warm-up",
                    self.config.start, WARMUP_BARS
                ))
            })?;
        if calendar[first_decision] > self.config.end {
            return Err(EngineError::DataUnavailable(format!(
                "window {}..{} is before the first tradable session {}",
                self.config.start, self.config.end, calendar[first_decision]
            )));
        }

        let sim = SimBroker::new(self.config.initial_capital, self.config.slippage_bps);
        let executor_config = ExecutorConfig {
            dry_run: false,
            ..ExecutorConfig::default()
        };
        let executor = Executor::new(&sim, None, executor_config);
        // The simulated matcher cannot time out; no order deadline applies.
        let no_deadline = Utc.with_ymd_and_hms(9999, 1, 1, 0, 0, 0).unwrap();

        let mut previous = TargetAllocation::all_cash();
        let mut bil_mark = Decimal::new(100, 0);
        let bil_daily = Decimal::from_f64(1.0 + self.config.bil_apr / 252.0)
            .unwrap_or(Decimal::ONE);

        let mut curve = EquityCurve::new();
        let mut daily = Vec::new();
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut open_episodes: BTreeMap<String, OpenEpisode> = BTreeMap::new();

        for index in first_decision..calendar.len() {
            let date = calendar[index];
            if date > self.config.end {
                break;
            }

            // (a) Context and signals from bars up to and including t.
            let closes = &ndx_closes_all[..index + 1];
            let context = MarketContext::from_closes(closes)?;
            let signals = evaluate_all(closes);
            let composite = composite_score(&signals);

            // (b) Combine against the replay's own previous allocation.
            let decision = self.combiner.combine(&context, &previous)?;

            // Session closes; BIL accrues its daily yield when no real
            // price series is cached.
            if have_bil_series {
                bil_mark = bil_closes[index];
            } else {
                bil_mark = (bil_mark * bil_daily).round_dp(8);
            }
            let mut marks = BTreeMap::new();
            marks.insert(LONG_ETF.to_string(), tqqq_closes[index]);
            marks.insert(SHORT_ETF.to_string(), sqqq_closes[index]);
            marks.insert(CASH_ETF.to_string(), bil_mark);
            sim.set_marks(marks.clone());

            // (c) Reconcile against the simulated account.
            let snapshot = sim.get_account().await?;
            let plan = build_plan(
                &decision.allocation,
                &snapshot,
                &marks,
                &self.reconciler_config,
            )?;

            // (d) Apply orders at close_t through the shared executor.
            let report = executor.execute(&plan, no_deadline).await?;
            if !report.is_complete() {
                return Err(EngineError::invariant(
                    "simulated execution did not complete".to_string(),
                ));
            }
            for fill in &report.fills {
                let notional = Decimal::from(fill.filled_quantity) * fill.avg_fill_price;
                let episode = open_episodes
                    .entry(fill.symbol.clone())
                    .or_insert_with(|| OpenEpisode {
                        entry_date: date,
                        entry_index: index,
                        cash_in: Decimal::ZERO,
                        cash_out: Decimal::ZERO,
                    });
                match fill.side {
                    crate::broker::OrderSide::Buy => episode.cash_in += notional,
                    crate::broker::OrderSide::Sell => episode.cash_out += notional,
                }
            }

            // (e) Mark to market and close out flat episodes.
            let after = sim.get_account().await?;
            let mut closed: Vec<String> = Vec::new();
            for (symbol, episode) in &open_episodes {
                if after.quantity(symbol) == 0 {
                    trades.push(TradeRecord {
                        symbol: symbol.clone(),
                        entry_date: episode.entry_date,
                        exit_date: Some(date),
                        sessions_held: (index - episode.entry_index) as u32,
                        cash_in: episode.cash_in,
                        cash_out: episode.cash_out,
                    });
                    closed.push(symbol.clone());
                }
            }
            for symbol in closed {
                open_episodes.remove(&symbol);
            }

            // (f) Record the session.
            let equity = after.equity;
            curve.add_point(date, equity.to_f64().unwrap_or(0.0));
            debug!(
                "{} equity={} state={} composite={:.4} orders={}",
                date,
                equity,
                decision.state,
                composite,
                report.submitted.len()
            );
            daily.push(DailyRecord {
                date,
                equity,
                positions: after
                    .positions
                    .iter()
                    .map(|(symbol, p)| (symbol.clone(), p.quantity))
                    .collect(),
                allocation: decision.allocation,
                state: decision.state,
                composite_score: composite,
                orders_submitted: report.submitted.len(),
            });
            previous = decision.allocation;
        }

        if daily.is_empty() {
            return Err(EngineError::DataUnavailable(
                "no sessions inside the backtest window".to_string(),
            ));
        }

        // Force-close surviving episodes at the final mark for the stats.
        let final_snapshot = sim.get_account().await?;
        let last = daily.last().unwrap();
        for (symbol, episode) in open_episodes {
            let held = final_snapshot
                .positions
                .get(&symbol)
                .map(|p| p.market_value)
                .unwrap_or(Decimal::ZERO);
            trades.push(TradeRecord {
                symbol,
                entry_date: episode.entry_date,
                exit_date: None,
                sessions_held: (daily.len() - 1
                    - (episode.entry_index - first_decision)) as u32,
                cash_in: episode.cash_in,
                cash_out: episode.cash_out + held,
            });
        }
        trades.sort_by(|a, b| (a.entry_date, a.symbol.clone()).cmp(&(b.entry_date, b.symbol.clone())));

        let metrics = SummaryMetrics::calculate(&curve, &trades);
        info!(
            "backtest complete: {} sessions, final equity {}",
            daily.len(),
            last.equity
        );
        Ok(BacktestResult {
            start_date: daily.first().unwrap().date,
            end_date: last.date,
            initial_capital: self.config.initial_capital,
            final_equity: last.equity,
            equity_curve: curve,
            trades,
            daily,
            metrics,
        })
    }
}
