// Replay determinism and end-to-end behavior over synthetic aligned bars.

mod helpers;

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use helpers::{history_from_closes, index_path, levered_series};
use whitelight::allocation::WARMUP_BARS;
use whitelight::backtesting::{BacktestConfig, BacktestEngine};
use whitelight::config::EngineConfig;
use whitelight::error::EngineError;
use whitelight::market_data::PriceHistory;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// NDX plus both leveraged legs on the same weekday calendar. No BIL series:
/// the replay accrues the configured APR instead.
fn aligned_histories(index_closes: &[f64]) -> BTreeMap<String, PriceHistory> {
    let tqqq = levered_series(index_closes, 3.0, 40.0);
    let sqqq = levered_series(index_closes, -3.0, 25.0);
    let mut histories = BTreeMap::new();
    histories.insert("NDX".to_string(), history_from_closes(index_closes));
    histories.insert("TQQQ".to_string(), history_from_closes(&tqqq));
    histories.insert("SQQQ".to_string(), history_from_closes(&sqqq));
    histories
}

fn backtest_config(histories: &BTreeMap<String, PriceHistory>) -> BacktestConfig {
    let calendar: Vec<_> = histories["NDX"].bars().iter().map(|b| b.date).collect();
    BacktestConfig {
        start: calendar[0],
        end: *calendar.last().unwrap(),
        initial_capital: dec("100000"),
        slippage_bps: 0.0,
        bil_apr: 0.045,
    }
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let histories = aligned_histories(&index_path(320, 25, 60));
    let engine_config = EngineConfig::default();
    let config = backtest_config(&histories);

    let first = BacktestEngine::new(&engine_config, config.clone())
        .run(&histories)
        .await
        .unwrap();
    let second = BacktestEngine::new(&engine_config, config)
        .run(&histories)
        .await
        .unwrap();

    // Identical bars and config must give identical curves.
    assert_eq!(first.equity_curve.equity, second.equity_curve.equity);
    assert_eq!(first.equity_curve.dates, second.equity_curve.dates);
    assert_eq!(first.final_equity, second.final_equity);
    assert_eq!(first.trades.len(), second.trades.len());
    for (a, b) in first.daily.iter().zip(second.daily.iter()) {
        assert_eq!(a.allocation, b.allocation);
        assert_eq!(a.composite_score.to_bits(), b.composite_score.to_bits());
    }
}

#[tokio::test]
async fn test_replay_walks_the_full_window() {
    let histories = aligned_histories(&index_path(320, 25, 60));
    let config = backtest_config(&histories);
    let result = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap();

    // 320+25+60+1 sessions minus the 260-bar warm-up.
    let total = 320 + 25 + 60 + 1;
    assert_eq!(result.daily.len(), total - WARMUP_BARS);
    assert_eq!(result.equity_curve.equity.len(), result.daily.len());
    assert!(result.final_equity > Decimal::ZERO);
}

#[tokio::test]
async fn test_replay_respects_sprint_bound() {
    // A long, volatile decline: SQQQ exposure only inside 15-session windows.
    let histories = aligned_histories(&index_path(300, 60, 10));
    let config = backtest_config(&histories);
    let result = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap();

    let mut consecutive_short = 0u32;
    for record in &result.daily {
        if record.allocation.sqqq > Decimal::ZERO {
            consecutive_short += 1;
            assert!(
                consecutive_short <= 15,
                "SQQQ held {} consecutive sessions",
                consecutive_short
            );
        } else {
            consecutive_short = 0;
        }
    }
}

#[tokio::test]
async fn test_replay_never_flips_directly() {
    let histories = aligned_histories(&index_path(300, 40, 60));
    let config = backtest_config(&histories);
    let result = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap();

    for pair in result.daily.windows(2) {
        let flipped = (pair[0].allocation.tqqq > Decimal::ZERO
            && pair[1].allocation.sqqq > Decimal::ZERO)
            || (pair[0].allocation.sqqq > Decimal::ZERO
                && pair[1].allocation.tqqq > Decimal::ZERO);
        assert!(!flipped, "{} -> {}", pair[0].date, pair[1].date);
    }
}

#[tokio::test]
async fn test_short_history_is_refused() {
    let histories = aligned_histories(&index_path(100, 10, 10));
    let config = backtest_config(&histories);
    let err = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DataUnavailable(_)));
}

#[tokio::test]
async fn test_calendar_gap_is_fatal() {
    let index_closes = index_path(320, 20, 20);
    let mut histories = aligned_histories(&index_closes);

    // Knock one session out of the TQQQ series.
    let tqqq = histories.remove("TQQQ").unwrap();
    let mut bars = tqqq.bars().to_vec();
    bars.remove(bars.len() / 2);
    histories.insert("TQQQ".to_string(), PriceHistory::new(bars).unwrap());

    let config = backtest_config(&histories);
    let err = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DataGap { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_missing_leg_is_fatal() {
    let mut histories = aligned_histories(&index_path(320, 20, 20));
    histories.remove("SQQQ");
    let config = backtest_config(&histories);
    let err = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DataUnavailable(_)));
}

#[tokio::test]
async fn test_metrics_are_populated() {
    let histories = aligned_histories(&index_path(320, 25, 60));
    let config = backtest_config(&histories);
    let result = BacktestEngine::new(&EngineConfig::default(), config)
        .run(&histories)
        .await
        .unwrap();

    assert!(result.metrics.cagr.is_finite());
    assert!(result.metrics.max_drawdown_pct <= 0.0);
    assert!(result.metrics.sharpe.is_finite());
    assert!(!result.trades.is_empty());
    // Every closed trade carries a positive holding period.
    for trade in &result.trades {
        if trade.exit_date.is_some() {
            assert!(trade.exit_date.unwrap() >= trade.entry_date);
        }
    }
}
