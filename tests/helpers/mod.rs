// Test helper utilities and fixtures

#![allow(dead_code)] // Each integration test binary uses a subset

use chrono::{Datelike, NaiveDate, Weekday};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use whitelight::market_data::{Bar, PriceHistory};

/// First session used by the synthetic calendars.
pub fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

/// Next trading day, skipping weekends (no holiday calendar in fixtures).
pub fn next_session(date: NaiveDate) -> NaiveDate {
    let mut next = date.succ_opt().unwrap();
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next = next.succ_opt().unwrap();
    }
    next
}

/// Build a history from closes on consecutive weekday sessions.
pub fn history_from_closes(closes: &[f64]) -> PriceHistory {
    let mut date = start_date();
    let mut bars = Vec::with_capacity(closes.len());
    for &close in closes {
        let px = Decimal::from_f64(close).unwrap().round_dp(8);
        bars.push(Bar {
            date,
            open: px,
            high: px,
            low: px,
            close: px,
            volume: 1_000_000,
        });
        date = next_session(date);
    }
    PriceHistory::new(bars).unwrap()
}

/// Previous trading day, skipping weekends.
pub fn prev_session(date: NaiveDate) -> NaiveDate {
    let mut prev = date.pred_opt().unwrap();
    while matches!(prev.weekday(), Weekday::Sat | Weekday::Sun) {
        prev = prev.pred_opt().unwrap();
    }
    prev
}

/// Build a history whose final session lands exactly on `end` (which must be
/// a weekday), walking the weekday calendar backwards.
pub fn history_ending_at(closes: &[f64], end: NaiveDate) -> PriceHistory {
    assert!(!matches!(end.weekday(), Weekday::Sat | Weekday::Sun));
    let mut dates = Vec::with_capacity(closes.len());
    let mut date = end;
    for _ in 0..closes.len() {
        dates.push(date);
        date = prev_session(date);
    }
    dates.reverse();
    let bars = dates
        .into_iter()
        .zip(closes.iter())
        .map(|(date, &close)| {
            let px = Decimal::from_f64(close).unwrap().round_dp(8);
            Bar {
                date,
                open: px,
                high: px,
                low: px,
                close: px,
                volume: 1_000_000,
            }
        })
        .collect();
    PriceHistory::new(bars).unwrap()
}

/// Daily simple returns of a close series.
pub fn returns_of(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Apply a leverage factor to an index close series, compounding daily.
/// `leverage` of -3.0 produces an inverse 3x series.
pub fn levered_series(index_closes: &[f64], leverage: f64, start_price: f64) -> Vec<f64> {
    let mut series = vec![start_price];
    for r in returns_of(index_closes) {
        let next = series.last().unwrap() * (1.0 + leverage * r);
        series.push(next.max(0.01));
    }
    series
}

/// Index path: a calm drift phase, a crash phase, then a recovery phase.
/// Deterministic; the oscillation term keeps realized vol non-degenerate.
pub fn index_path(calm: usize, crash: usize, recovery: usize) -> Vec<f64> {
    let mut closes = vec![15_000.0];
    for i in 0..calm {
        let wiggle = if i % 2 == 0 { 0.004 } else { -0.004 };
        let next = closes.last().unwrap() * (1.0 + 0.0006 + wiggle);
        closes.push(next);
    }
    for i in 0..crash {
        let wiggle = if i % 2 == 0 { 0.012 } else { -0.012 };
        let next = closes.last().unwrap() * (1.0 - 0.015 + wiggle);
        closes.push(next);
    }
    for i in 0..recovery {
        let wiggle = if i % 2 == 0 { 0.005 } else { -0.005 };
        let next = closes.last().unwrap() * (1.0 + 0.002 + wiggle);
        closes.push(next);
    }
    closes
}
