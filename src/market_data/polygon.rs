// src/market_data/polygon.rs
// Polygon.io integration: async fetch of daily aggregates.
// Endpoint: https://api.polygon.io/v2/aggs/ticker/{symbol}/range/1/day/{start}/{end}
// Index symbols are addressed with the vendor "I:" prefix at this layer; the
// core uses unprefixed names.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{Bar, MarketDataProvider};
use crate::error::EngineError;

const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Symbols quoted as indices at the vendor.
const INDEX_SYMBOLS: [&str; 3] = ["NDX", "SPX", "VIX"];

#[derive(Debug, Deserialize)]
struct AggBar {
    /// Millisecond epoch of the session start.
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
}

#[derive(Debug, Deserialize)]
struct AggResponse {
    #[serde(default)]
    results: Vec<AggBar>,
    status: String,
}

pub struct PolygonProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PolygonProvider {
    pub fn new(api_key: String) -> Result<Self, EngineError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::config(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn vendor_symbol(symbol: &str) -> String {
        if INDEX_SYMBOLS.contains(&symbol) {
            format!("I:{}", symbol)
        } else {
            symbol.to_string()
        }
    }

    fn transient(&self, message: impl Into<String>) -> EngineError {
        EngineError::ProviderTransient {
            provider: "polygon".to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for PolygonProvider {
    fn name(&self) -> &str {
        "polygon"
    }

    async fn get_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, EngineError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}?adjusted=true&sort=asc&limit=50000&apiKey={}",
            self.base_url,
            Self::vendor_symbol(symbol),
            start,
            end,
            self.api_key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.transient(format!("HTTP {}: {}", status, body)));
        }

        let data: AggResponse = response
            .json()
            .await
            .map_err(|e| self.transient(format!("bad aggregates payload: {}", e)))?;
        if data.status != "OK" && data.status != "DELAYED" {
            return Err(self.transient(format!("aggregates status {}", data.status)));
        }

        let mut bars = Vec::with_capacity(data.results.len());
        for agg in data.results {
            let date = DateTime::from_timestamp_millis(agg.t)
                .ok_or_else(|| self.transient(format!("bad epoch {}", agg.t)))?
                .date_naive();
            let px = |v: f64| -> Result<Decimal, EngineError> {
                Decimal::from_f64(v)
                    .map(|d| d.round_dp(8))
                    .ok_or_else(|| self.transient(format!("unrepresentable price {}", v)))
            };
            bars.push(Bar {
                date,
                open: px(agg.o)?,
                high: px(agg.h)?,
                low: px(agg.l)?,
                close: px(agg.c)?,
                volume: agg.v as u64,
            });
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_symbols_are_prefixed() {
        assert_eq!(PolygonProvider::vendor_symbol("NDX"), "I:NDX");
        assert_eq!(PolygonProvider::vendor_symbol("TQQQ"), "TQQQ");
    }

    #[tokio::test]
    #[ignore] // Only run with a real POLYGON_API_KEY set
    async fn test_fetch_tqqq_window() {
        let key = std::env::var("POLYGON_API_KEY").expect("POLYGON_API_KEY not set");
        let provider = PolygonProvider::new(key).unwrap();
        let bars = provider
            .get_daily_bars(
                "TQQQ",
                "2024-01-02".parse().unwrap(),
                "2024-01-31".parse().unwrap(),
            )
            .await
            .expect("fetch failed");
        assert!(!bars.is_empty());
    }
}
