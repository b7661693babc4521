// Performance metrics and analytics over a replay's equity curve and trades.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::allocation::{AllocationState, TargetAllocation};
use crate::indicators::TRADING_DAYS;

#[derive(Debug, Clone, Default)]
pub struct EquityCurve {
    pub dates: Vec<NaiveDate>,
    pub equity: Vec<f64>,
    pub drawdown: Vec<f64>,
}

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, date: NaiveDate, equity: f64) {
        self.dates.push(date);
        self.equity.push(equity);

        // Drawdown from the running peak, in percent (<= 0).
        let peak = self.equity.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let drawdown = if peak > 0.0 {
            (equity - peak) / peak * 100.0
        } else {
            0.0
        };
        self.drawdown.push(drawdown);
    }

    pub fn daily_returns(&self) -> Vec<f64> {
        self.equity
            .windows(2)
            .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
            .collect()
    }
}

/// One position episode: first entry to flat, cash-flow accounted.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub symbol: String,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub sessions_held: u32,
    /// Cash paid buying into the episode.
    pub cash_in: Decimal,
    /// Cash received selling out (plus final mark when force-closed).
    pub cash_out: Decimal,
}

impl TradeRecord {
    pub fn pnl(&self) -> Decimal {
        self.cash_out - self.cash_in
    }

    pub fn is_winner(&self) -> bool {
        self.pnl() > Decimal::ZERO
    }
}

/// Per-session telemetry captured by the replay.
#[derive(Debug, Clone)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub equity: Decimal,
    /// Whole-share holdings after the session's fills.
    pub positions: std::collections::BTreeMap<String, i64>,
    pub allocation: TargetAllocation,
    pub state: AllocationState,
    pub composite_score: f64,
    pub orders_submitted: usize,
}

#[derive(Debug, Clone)]
pub struct SummaryMetrics {
    pub cagr: f64,
    /// Largest peak-to-trough loss, as a negative percent.
    pub max_drawdown_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub profit_factor: f64,
    /// Percent of closed episodes with positive P&L.
    pub win_rate: f64,
    pub total_trades: usize,
    pub avg_trade_sessions: f64,
}

impl SummaryMetrics {
    pub fn calculate(curve: &EquityCurve, trades: &[TradeRecord]) -> Self {
        let returns = curve.daily_returns();

        let cagr = match (curve.equity.first(), curve.equity.last()) {
            (Some(&first), Some(&last)) if first > 0.0 && !returns.is_empty() => {
                (last / first).powf(TRADING_DAYS / returns.len() as f64) - 1.0
            }
            _ => 0.0,
        };

        let max_drawdown_pct = curve.drawdown.iter().cloned().fold(0.0_f64, f64::min);

        let (sharpe, sortino) = Self::risk_ratios(&returns);
        let calmar = if max_drawdown_pct < 0.0 {
            cagr / (max_drawdown_pct.abs() / 100.0)
        } else {
            0.0
        };

        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(|t| t.pnl().to_f64().unwrap_or(0.0))
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| !t.is_winner())
            .map(|t| t.pnl().to_f64().unwrap_or(0.0).abs())
            .collect();
        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().sum();
        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trades.len() as f64 * 100.0
        };
        let avg_trade_sessions = if trades.is_empty() {
            0.0
        } else {
            trades.iter().map(|t| t.sessions_held as f64).sum::<f64>() / trades.len() as f64
        };

        Self {
            cagr,
            max_drawdown_pct,
            sharpe,
            sortino,
            calmar,
            profit_factor,
            win_rate,
            total_trades: trades.len(),
            avg_trade_sessions,
        }
    }

    /// Annualized Sharpe (risk-free = 0) and Sortino (downside-only
    /// denominator over all observations).
    fn risk_ratios(returns: &[f64]) -> (f64, f64) {
        if returns.len() < 2 {
            return (0.0, 0.0);
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / (returns.len() - 1) as f64;
        let std_dev = variance.sqrt();
        let sharpe = if std_dev > 0.0 {
            mean / std_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        };

        let downside_sq = returns
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .sum::<f64>()
            / returns.len() as f64;
        let downside_dev = downside_sq.sqrt();
        let sortino = if downside_dev > 0.0 {
            mean / downside_dev * TRADING_DAYS.sqrt()
        } else {
            0.0
        };
        (sharpe, sortino)
    }
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub equity_curve: EquityCurve,
    pub trades: Vec<TradeRecord>,
    pub daily: Vec<DailyRecord>,
    pub metrics: SummaryMetrics,
}

impl BacktestResult {
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(72));
        println!("BACKTEST RESULTS  {} .. {}", self.start_date, self.end_date);
        println!("{}", "=".repeat(72));
        println!("Initial Capital:  ${:.2}", self.initial_capital);
        println!("Final Equity:     ${:.2}", self.final_equity);
        println!();
        println!("CAGR:             {:>10.2}%", self.metrics.cagr * 100.0);
        println!("Max Drawdown:     {:>10.2}%", self.metrics.max_drawdown_pct);
        println!("Sharpe:           {:>10.2}", self.metrics.sharpe);
        println!("Sortino:          {:>10.2}", self.metrics.sortino);
        println!("Calmar:           {:>10.2}", self.metrics.calmar);
        println!("Profit Factor:    {:>10.2}", self.metrics.profit_factor);
        println!("Win Rate:         {:>10.2}%", self.metrics.win_rate);
        println!("Trades:           {:>10}", self.metrics.total_trades);
        println!("Avg Sessions/Trade:{:>9.1}", self.metrics.avg_trade_sessions);
        println!("{}", "=".repeat(72));
    }

    /// Equity-curve CSV for research notebooks: date,equity,drawdown_pct.
    pub fn write_equity_csv<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), crate::error::EngineError> {
        use std::io::Write;
        let mut file = std::fs::File::create(&path)
            .map_err(|e| crate::error::EngineError::Cache(e.to_string()))?;
        writeln!(file, "date,equity,drawdown_pct")
            .map_err(|e| crate::error::EngineError::Cache(e.to_string()))?;
        for i in 0..self.equity_curve.dates.len() {
            writeln!(
                file,
                "{},{:.6},{:.6}",
                self.equity_curve.dates[i],
                self.equity_curve.equity[i],
                self.equity_curve.drawdown[i]
            )
            .map_err(|e| crate::error::EngineError::Cache(e.to_string()))?;
        }
        Ok(())
    }
}
