// Market data: daily bars, price histories, and the provider capability.

pub mod cache;
pub mod polygon;
pub mod yahoo;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One trading session for one symbol. The close is the only price used for
/// decisions; bars are immutable once the session has closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

/// Chronologically ordered bars for one symbol, strictly increasing by date.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    bars: Vec<Bar>,
}

impl PriceHistory {
    /// Sorts by date and rejects duplicate sessions.
    pub fn new(mut bars: Vec<Bar>) -> Result<Self, EngineError> {
        bars.sort_by_key(|b| b.date);
        for pair in bars.windows(2) {
            if pair[0].date == pair[1].date {
                return Err(EngineError::Cache(format!(
                    "duplicate bar for {}",
                    pair[0].date
                )));
            }
        }
        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.bars.last().map(|b| b.close)
    }

    /// Closes as f64 for the indicator layer. Ratios only; money stays Decimal.
    pub fn closes_f64(&self) -> Vec<f64> {
        self.bars
            .iter()
            .map(|b| b.close.to_f64().unwrap_or(0.0))
            .collect()
    }

    /// The prefix of bars up to and including `date`.
    pub fn up_to(&self, date: NaiveDate) -> &[Bar] {
        let end = self.bars.partition_point(|b| b.date <= date);
        &self.bars[..end]
    }

    /// Merge newer bars into this history, replacing same-date entries.
    pub fn merge(&mut self, incoming: Vec<Bar>) {
        for bar in incoming {
            match self.bars.binary_search_by_key(&bar.date, |b| b.date) {
                Ok(i) => self.bars[i] = bar,
                Err(i) => self.bars.insert(i, bar),
            }
        }
    }
}

/// Market-data capability: daily bars for a symbol over an inclusive range.
/// The cache layer is the source of truth; providers only fill the delta.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError>;
}

/// Verify that every symbol trades the same calendar and return it.
///
/// Histories are first trimmed to their common [max(first), min(last)] range;
/// any date present for one symbol but missing for another inside that range
/// is a data gap.
pub fn align_calendar(
    histories: &BTreeMap<String, PriceHistory>,
) -> Result<Vec<NaiveDate>, EngineError> {
    let mut iter = histories.iter();
    let (first_symbol, first_history) = iter.next().ok_or_else(|| {
        EngineError::DataUnavailable("no histories to align".to_string())
    })?;
    if first_history.is_empty() {
        return Err(EngineError::DataUnavailable(format!(
            "{} history is empty",
            first_symbol
        )));
    }

    let mut start = first_history.bars()[0].date;
    let mut end = first_history.latest_date().unwrap();
    for (symbol, history) in histories.iter() {
        let (Some(first), Some(last)) = (history.bars().first(), history.bars().last()) else {
            return Err(EngineError::DataUnavailable(format!(
                "{} history is empty",
                symbol
            )));
        };
        start = start.max(first.date);
        end = end.min(last.date);
    }

    let calendar: Vec<NaiveDate> = first_history
        .bars()
        .iter()
        .map(|b| b.date)
        .filter(|d| *d >= start && *d <= end)
        .collect();

    for (symbol, history) in histories.iter() {
        let dates: Vec<NaiveDate> = history
            .bars()
            .iter()
            .map(|b| b.date)
            .filter(|d| *d >= start && *d <= end)
            .collect();
        if dates != calendar {
            let missing = calendar
                .iter()
                .find(|d| !dates.contains(d))
                .or_else(|| dates.iter().find(|d| !calendar.contains(d)))
                .copied()
                .unwrap_or(start);
            return Err(EngineError::DataGap {
                symbol: symbol.clone(),
                date: missing,
            });
        }
    }
    Ok(calendar)
}
