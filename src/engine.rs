// Orchestrator: one daily session from bars to fills.
//
// The engine is a function from (bars, snapshot, previous allocation) to
// (plan, fills, telemetry). It holds no state between runs: the previous
// allocation is derived from live positions at run start, and the only
// persistence is the bar cache.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Utc};
use log::{info, warn};
use rust_decimal::Decimal;

use crate::alerts::{AlertHub, AlertSender, EmailAlerter, LogAlerter, Severity, WebhookAlerter};
use crate::allocation::{
    AllocationDecision, Combiner, MarketContext, CASH_ETF, INDEX_SYMBOL, LONG_ETF, SHORT_ETF,
};
use crate::broker::{AccountSnapshot, BrokerClient, PlannedOrder};
use crate::broker::alpaca::AlpacaBroker;
use crate::config::{DataSource, EngineConfig};
use crate::error::EngineError;
use crate::execution::{
    build_plan, ExecutionOutcome, ExecutionReport, Executor, ExecutorConfig, ReconcilerConfig,
};
use crate::market_data::cache::BarCache;
use crate::market_data::polygon::PolygonProvider;
use crate::market_data::yahoo::YahooProvider;
use crate::market_data::{MarketDataProvider, PriceHistory};
use crate::secrets::SecretStore;
use crate::signals::{composite_score, evaluate_all, SignalReport};

/// Every symbol the engine trades or observes.
pub const UNIVERSE: [&str; 4] = [INDEX_SYMBOL, LONG_ETF, SHORT_ETF, CASH_ETF];

/// Calendar days of history to request when the cache is cold; covers the
/// 260-session warm-up with margin for holidays.
const COLD_START_DAYS: i64 = 600;

/// Everything one session decided and did, for telemetry and alerts.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub date: NaiveDate,
    pub context: MarketContext,
    pub signals: Vec<SignalReport>,
    pub composite_score: f64,
    pub decision: AllocationDecision,
    pub plan: Vec<PlannedOrder>,
    pub execution: Option<ExecutionReport>,
}

pub struct TradingEngine {
    config: EngineConfig,
    combiner: Combiner,
    cache: BarCache,
    provider: Option<Box<dyn MarketDataProvider>>,
    primary: Box<dyn BrokerClient>,
    secondary: Option<Box<dyn BrokerClient>>,
    alerts: AlertHub,
}

impl TradingEngine {
    /// Wire every collaborator from config. Secrets are read here, once,
    /// before any network I/O; a missing secret fails with exit code 2.
    pub fn from_config(
        config: EngineConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let provider: Option<Box<dyn MarketDataProvider>> = match config.data_source {
            DataSource::Polygon => Some(Box::new(PolygonProvider::new(
                secrets.get("POLYGON_API_KEY")?,
            )?)),
            DataSource::Yahoo => Some(Box::new(YahooProvider::new())),
            DataSource::Cache => None,
        };

        let build_broker = |endpoint: &crate::config::BrokerEndpoint| -> Result<AlpacaBroker, EngineError> {
            AlpacaBroker::new(
                endpoint.name.clone(),
                endpoint.base_url.clone(),
                secrets.get(&endpoint.key_id_secret)?,
                secrets.get(&endpoint.key_secret_secret)?,
            )
        };
        let primary: Box<dyn BrokerClient> = Box::new(build_broker(&config.broker_primary)?);
        let secondary: Option<Box<dyn BrokerClient>> = match &config.broker_secondary {
            Some(endpoint) => Some(Box::new(build_broker(endpoint)?)),
            None => None,
        };

        let mut senders: Vec<Box<dyn AlertSender>> = vec![Box::new(LogAlerter)];
        if let Some(url) = &config.alert_webhook_url {
            senders.push(Box::new(WebhookAlerter::new(url.clone())?));
        }
        if let Some(email) = &config.alert_email {
            senders.push(Box::new(EmailAlerter::new(
                email,
                secrets.get(&email.user_secret)?,
                secrets.get(&email.password_secret)?,
            )?));
        }

        let cache = BarCache::new(&config.cache_dir)?;
        Ok(Self {
            combiner: Combiner::from_config(&config),
            cache,
            provider,
            primary,
            secondary,
            alerts: AlertHub::new(senders),
            config,
        })
    }

    /// Cache and provider only; no brokerage credentials required. Used by
    /// `sync` and `backtest`, which never submit orders.
    pub fn market_data_only(
        config: EngineConfig,
        secrets: &dyn SecretStore,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let provider: Option<Box<dyn MarketDataProvider>> = match config.data_source {
            DataSource::Polygon => Some(Box::new(PolygonProvider::new(
                secrets.get("POLYGON_API_KEY")?,
            )?)),
            DataSource::Yahoo => Some(Box::new(YahooProvider::new())),
            DataSource::Cache => None,
        };
        let cache = BarCache::new(&config.cache_dir)?;
        Ok(Self {
            combiner: Combiner::from_config(&config),
            cache,
            provider,
            primary: Box::new(NoBroker),
            secondary: None,
            alerts: AlertHub::new(vec![Box::new(LogAlerter)]),
            config,
        })
    }

    /// Test seam: inject brokers and alerts directly.
    pub fn with_parts(
        config: EngineConfig,
        cache: BarCache,
        provider: Option<Box<dyn MarketDataProvider>>,
        primary: Box<dyn BrokerClient>,
        secondary: Option<Box<dyn BrokerClient>>,
        alerts: AlertHub,
    ) -> Self {
        Self {
            combiner: Combiner::from_config(&config),
            cache,
            provider,
            primary,
            secondary,
            alerts,
            config,
        }
    }

    /// Refresh the bar cache from the provider without trading.
    pub async fn sync(&self, today: NaiveDate) -> Result<(), EngineError> {
        let _lock = self.cache.lock()?;
        let histories = self.sync_histories(today).await?;
        for (symbol, history) in &histories {
            info!(
                "cache {}: {} bars through {:?}",
                symbol,
                history.len(),
                history.latest_date()
            );
        }
        Ok(())
    }

    /// Run the daily pipeline. `today` is the decision session.
    pub async fn run_session(
        &self,
        today: NaiveDate,
        dry_run: bool,
    ) -> Result<SessionReport, EngineError> {
        let session_id = format!("wl-{}-{}", today, Utc::now().format("%H%M%S"));
        info!("session {} starting (dry_run={})", session_id, dry_run);

        let result = self.run_session_inner(&session_id, today, dry_run).await;
        if let Err(e) = &result {
            let severity = match e {
                EngineError::OrderRejected { .. } => Severity::Warn,
                _ => Severity::Critical,
            };
            self.alerts
                .broadcast(severity, "session failed", &format!("{}: {}", session_id, e))
                .await;
        }
        result
    }

    async fn run_session_inner(
        &self,
        session_id: &str,
        today: NaiveDate,
        dry_run: bool,
    ) -> Result<SessionReport, EngineError> {
        let _lock = self.cache.lock()?;

        // Bars first: no orders can be right if the data is not.
        let histories = self.sync_histories(today).await?;
        for symbol in UNIVERSE {
            let latest = histories[symbol].latest_date();
            if latest != Some(today) {
                return Err(EngineError::DataGap {
                    symbol: symbol.to_string(),
                    date: today,
                });
            }
        }

        let closes = histories[INDEX_SYMBOL].closes_f64();
        let context = MarketContext::from_closes(&closes)?;
        let signals = evaluate_all(&closes);
        let composite = composite_score(&signals);
        for report in &signals {
            info!(
                "session {} signal {}: score {:+.2} ({})",
                session_id, report.name, report.signal.raw_score, report.signal.strength
            );
        }
        info!("session {} composite score {:+.4}", session_id, composite);

        match self.primary.is_market_open().await {
            Ok(false) => warn!("session {}: market reported closed", session_id),
            Ok(true) => {}
            Err(e) => warn!("session {}: market clock unavailable: {}", session_id, e),
        }

        let snapshot = self.account_snapshot().await?;
        let previous = snapshot.derive_previous_allocation();
        let decision = self.combiner.combine(&context, &previous)?;
        info!(
            "session {} allocation {}: TQQQ {} / SQQQ {} / BIL {}",
            session_id,
            decision.state,
            decision.allocation.tqqq,
            decision.allocation.sqqq,
            decision.allocation.bil
        );

        let latest_closes: BTreeMap<String, Decimal> = [LONG_ETF, SHORT_ETF, CASH_ETF]
            .iter()
            .map(|s| {
                histories[*s]
                    .last_close()
                    .map(|c| (s.to_string(), c))
                    .ok_or_else(|| EngineError::DataGap {
                        symbol: s.to_string(),
                        date: today,
                    })
            })
            .collect::<Result<_, _>>()?;

        let plan = build_plan(
            &decision.allocation,
            &snapshot,
            &latest_closes,
            &ReconcilerConfig {
                min_order_notional: self.config.min_order_notional,
                rebalance_threshold: self.config.rebalance_threshold,
            },
        )?;

        let mut report = SessionReport {
            session_id: session_id.to_string(),
            date: today,
            context,
            signals,
            composite_score: composite,
            decision,
            plan: plan.clone(),
            execution: None,
        };

        if plan.is_empty() {
            info!("session {}: already at target, no trades needed", session_id);
            return Ok(report);
        }

        let deadline = today
            .and_time(self.config.market_close_utc)
            .and_utc()
            - Duration::seconds(60);
        let executor = Executor::new(
            self.primary.as_ref(),
            self.secondary.as_deref(),
            ExecutorConfig {
                retry_base_secs: self.config.retry_base_secs,
                retry_max_attempts: self.config.retry_max_attempts,
                safety_margin: self.config.safety_margin,
                poll_interval_ms: self.config.poll_interval_ms,
                dry_run: dry_run || self.config.dry_run,
            },
        );
        let execution = executor.execute(&plan, deadline).await?;

        let outcome = execution.outcome.clone();
        match outcome {
            ExecutionOutcome::Completed => {
                if execution.dry_run {
                    self.alerts
                        .broadcast(
                            Severity::Info,
                            "dry-run plan",
                            &format_plan(session_id, &plan),
                        )
                        .await;
                } else if !execution.skipped.is_empty() {
                    let detail: Vec<String> = execution
                        .skipped
                        .iter()
                        .map(|(o, why)| format!("{} {} {}: {}", o.side, o.quantity, o.symbol, why))
                        .collect();
                    self.alerts
                        .broadcast(Severity::Warn, "orders skipped", &detail.join("; "))
                        .await;
                } else {
                    self.alerts
                        .broadcast(
                            Severity::Info,
                            "session complete",
                            &format!(
                                "{}: {} orders filled",
                                session_id,
                                execution.fills.len()
                            ),
                        )
                        .await;
                }
                report.execution = Some(execution);
                Ok(report)
            }
            ExecutionOutcome::DeadlineMissed => {
                // Filled quantities are retained; the next session re-derives
                // its allocation from positions rather than catching up.
                Err(EngineError::DeadlineExceeded(format!(
                    "session {} incomplete: {} fills before cutoff",
                    session_id,
                    execution.fills.len()
                )))
            }
            ExecutionOutcome::BrokerFailure(message) => Err(EngineError::BrokerExhausted(message)),
        }
    }

    /// Load (and, when a provider is configured, top up) every history.
    async fn sync_histories(
        &self,
        today: NaiveDate,
    ) -> Result<BTreeMap<String, PriceHistory>, EngineError> {
        let mut histories = BTreeMap::new();
        for symbol in UNIVERSE {
            let cached = self.cache.load(symbol)?;
            let history = match &self.provider {
                Some(provider) if cached.latest_date() < Some(today) => {
                    let fetch_start = cached
                        .latest_date()
                        .and_then(|d| d.succ_opt())
                        .unwrap_or_else(|| today - Duration::days(COLD_START_DAYS));
                    match self
                        .fetch_with_retry(provider.as_ref(), symbol, fetch_start, today)
                        .await
                    {
                        Ok(bars) => self.cache.append(symbol, bars)?,
                        Err(e) => {
                            // The freshness check decides whether the cache
                            // is sufficient without today's delta.
                            warn!("provider fetch for {} failed: {}", symbol, e);
                            cached
                        }
                    }
                }
                _ => cached,
            };
            histories.insert(symbol.to_string(), history);
        }
        Ok(histories)
    }

    async fn fetch_with_retry(
        &self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<crate::market_data::Bar>, EngineError> {
        let attempts = self.config.retry_max_attempts.min(3);
        let mut last = None;
        for attempt in 1..=attempts {
            match provider.get_daily_bars(symbol, start, end).await {
                Ok(bars) => return Ok(bars),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.config.retry_base_secs * 2f64.powi(attempt as i32 - 1);
                    warn!(
                        "{} fetch {} attempt {}/{} failed: {}",
                        provider.name(),
                        symbol,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| {
            EngineError::DataUnavailable("provider retry loop exhausted".to_string())
        }))
    }

    /// Account snapshot with one retry pass and secondary fallback.
    async fn account_snapshot(&self) -> Result<AccountSnapshot, EngineError> {
        match self.primary.get_account().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if e.is_transient() => {
                warn!("primary account read failed: {}", e);
                if let Some(secondary) = &self.secondary {
                    secondary.get_account().await
                } else {
                    tokio::time::sleep(std::time::Duration::from_secs_f64(
                        self.config.retry_base_secs,
                    ))
                    .await;
                    self.primary.get_account().await
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Histories for the replay: the three traded legs plus the index, with
    /// BIL included only when the cache actually has it.
    pub fn load_backtest_histories(
        &self,
    ) -> Result<BTreeMap<String, PriceHistory>, EngineError> {
        let mut histories = BTreeMap::new();
        for symbol in [INDEX_SYMBOL, LONG_ETF, SHORT_ETF] {
            let history = self.cache.load(symbol)?;
            if history.is_empty() {
                return Err(EngineError::DataUnavailable(format!(
                    "cache has no bars for {}; run `whitelight sync` first",
                    symbol
                )));
            }
            histories.insert(symbol.to_string(), history);
        }
        let bil = self.cache.load(CASH_ETF)?;
        if !bil.is_empty() {
            histories.insert(CASH_ETF.to_string(), bil);
        }
        Ok(histories)
    }

    pub async fn sync_for_backtest(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(), EngineError> {
        let Some(provider) = &self.provider else {
            return Ok(());
        };
        // Reach back past `start` so the warm-up has bars to stand on.
        let fetch_start = start - Duration::days(COLD_START_DAYS);
        for symbol in UNIVERSE {
            let bars = self
                .fetch_with_retry(provider.as_ref(), symbol, fetch_start, end)
                .await?;
            self.cache.append(symbol, bars)?;
        }
        Ok(())
    }
}

/// Placeholder brokerage for data-only engines; every call is an error.
struct NoBroker;

#[async_trait::async_trait]
impl BrokerClient for NoBroker {
    fn name(&self) -> &str {
        "none"
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        Err(no_broker())
    }

    async fn submit_market_order(
        &self,
        _symbol: &str,
        _side: crate::broker::OrderSide,
        _quantity: u64,
    ) -> Result<String, EngineError> {
        Err(no_broker())
    }

    async fn poll_order(&self, _order_id: &str) -> Result<crate::broker::Fill, EngineError> {
        Err(no_broker())
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, EngineError> {
        Err(no_broker())
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        Err(no_broker())
    }
}

fn no_broker() -> EngineError {
    EngineError::Broker {
        broker: "none".to_string(),
        message: "engine was built without a brokerage".to_string(),
    }
}

fn format_plan(session_id: &str, plan: &[PlannedOrder]) -> String {
    let lines: Vec<String> = plan
        .iter()
        .map(|o| {
            format!(
                "{} {} {} (~${})",
                o.side, o.quantity, o.symbol, o.estimated_notional
            )
        })
        .collect();
    format!("{}: {}", session_id, lines.join("; "))
}
