// Typed engine configuration.
//
// Every tunable is enumerated here; unknown keys in the config file are a
// fatal error at load time. Money fields are Decimal, ratios are f64.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Which provider backs cache syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Polygon-style daily aggregates API (needs an API key secret).
    Polygon,
    /// Free Yahoo Finance fallback.
    Yahoo,
    /// No network: serve from the on-disk cache only.
    Cache,
}

/// One brokerage venue. `key_id_secret` / `key_secret_secret` name entries in
/// the secret store, never credential values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerEndpoint {
    pub name: String,
    pub base_url: String,
    pub key_id_secret: String,
    pub key_secret_secret: String,
}

/// SMTP alert transport settings. Credentials come from the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailAlertConfig {
    pub smtp_host: String,
    pub from: String,
    pub to: String,
    pub user_secret: String,
    pub password_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Annualized portfolio volatility target for the long leg.
    pub target_vol: f64,
    /// Realized-vol floor that arms the crash sprint.
    pub sprint_vol_threshold: f64,
    /// Sprint window length in sessions below the 200-day SMA.
    pub sprint_max_days: u32,
    /// Per-symbol weight change below which no order is issued.
    pub rebalance_threshold: f64,
    /// Orders below this notional are dropped.
    pub min_order_notional: Decimal,
    /// Fraction of available cash held back when sizing buys.
    pub safety_margin: f64,
    /// First retry delay; doubles per attempt, capped at 60s.
    pub retry_base_secs: f64,
    pub retry_max_attempts: u32,
    /// Order-status poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Annualized yield accrued on BIL notionals when no price series is used.
    pub bil_apr: f64,
    /// Uniform fill slippage applied in replay, in basis points.
    pub slippage_bps: f64,
    /// Session close in UTC; the order deadline is 60s before this.
    pub market_close_utc: NaiveTime,
    pub cache_dir: PathBuf,
    pub data_source: DataSource,
    pub broker_primary: BrokerEndpoint,
    pub broker_secondary: Option<BrokerEndpoint>,
    pub dry_run: bool,
    /// Optional JSON-POST alert endpoint.
    pub alert_webhook_url: Option<String>,
    /// Optional SMTP alert transport.
    pub alert_email: Option<EmailAlertConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_vol: 0.20,
            sprint_vol_threshold: 0.25,
            sprint_max_days: 15,
            rebalance_threshold: 0.05,
            min_order_notional: Decimal::new(10, 0),
            safety_margin: 0.02,
            retry_base_secs: 2.0,
            retry_max_attempts: 5,
            poll_interval_ms: 500,
            bil_apr: 0.045,
            slippage_bps: 0.0,
            // 16:00 New York expressed in UTC during DST; override per season.
            market_close_utc: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            cache_dir: PathBuf::from("bar_cache"),
            data_source: DataSource::Cache,
            broker_primary: BrokerEndpoint {
                name: "alpaca-paper".to_string(),
                base_url: "https://paper-api.alpaca.markets".to_string(),
                key_id_secret: "ALPACA_API_KEY".to_string(),
                key_secret_secret: "ALPACA_API_SECRET".to_string(),
            },
            broker_secondary: None,
            dry_run: false,
            alert_webhook_url: None,
            alert_email: None,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = fs::read_to_string(&path).map_err(|e| {
            EngineError::config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| EngineError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target_vol <= 0.0 {
            return Err(EngineError::config("target_vol must be positive"));
        }
        if self.sprint_vol_threshold <= 0.0 {
            return Err(EngineError::config("sprint_vol_threshold must be positive"));
        }
        if self.sprint_max_days == 0 {
            return Err(EngineError::config("sprint_max_days must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.rebalance_threshold) {
            return Err(EngineError::config("rebalance_threshold must be in [0, 1)"));
        }
        if self.min_order_notional < Decimal::ZERO {
            return Err(EngineError::config("min_order_notional must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.safety_margin) {
            return Err(EngineError::config("safety_margin must be in [0, 1)"));
        }
        if self.retry_max_attempts == 0 {
            return Err(EngineError::config("retry_max_attempts must be at least 1"));
        }
        if self.retry_base_secs <= 0.0 {
            return Err(EngineError::config("retry_base_secs must be positive"));
        }
        if self.slippage_bps < 0.0 {
            return Err(EngineError::config("slippage_bps must be non-negative"));
        }
        Ok(())
    }
}
