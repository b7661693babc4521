// Engine error kinds and recovery policy.
//
// Every failure the engine can surface carries one of these kinds; callers
// either recover (retry, fall back, failover) or propagate with context.
// Severity and process exit codes are derived from the kind, never from
// string matching.

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad or missing configuration. Fatal before any network I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required secret is absent from the secret store.
    #[error("secret '{0}' is not available")]
    SecretMissing(String),

    /// Historical data cannot support a decision (short history, empty cache).
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// The cache or provider has no bar for a session that must exist.
    #[error("data gap: {symbol} has no bar for {date}")]
    DataGap { symbol: String, date: NaiveDate },

    /// Market-data provider failed in a way worth retrying (5xx, timeout,
    /// rate limit). Falls back to the cache when the cache is sufficient.
    #[error("provider error ({provider}): {message}")]
    ProviderTransient { provider: String, message: String },

    /// Brokerage failed in a way worth retrying.
    #[error("broker transient error ({broker}): {message}")]
    BrokerTransient { broker: String, message: String },

    /// Brokerage unreachable (connect/timeout). Two in a row on the same
    /// order trigger failover to the secondary venue.
    #[error("broker connectivity ({broker}): {message}")]
    BrokerConnectivity { broker: String, message: String },

    /// Brokerage answered but the request is final (auth, malformed reply).
    #[error("broker error ({broker}): {message}")]
    Broker { broker: String, message: String },

    /// The venue rejected this order for good (halted symbol, buying power).
    /// The rest of the plan continues.
    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    /// Retries and failover are exhausted.
    #[error("broker failure after retries: {0}")]
    BrokerExhausted(String),

    /// Past `market_close - 60s`: no new orders, cancel in-flight.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A hard invariant was violated (weights off one, negative quantity,
    /// direct flip). Fail fast, no orders.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Bar-cache I/O failure (unreadable file, lock held by another run).
    #[error("cache error: {0}")]
    Cache(String),

    /// Alert transport failure. Logged by the hub, never aborts a session.
    #[error("alert transport error: {0}")]
    Alert(String),
}

impl EngineError {
    /// Errors the executor may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::ProviderTransient { .. }
                | EngineError::BrokerTransient { .. }
                | EngineError::BrokerConnectivity { .. }
        )
    }

    /// Connectivity failures count toward the failover trigger.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, EngineError::BrokerConnectivity { .. })
    }

    /// Process exit code for the CLI surface.
    ///
    /// 0 success, 2 configuration, 3 data unavailable, 4 broker failure
    /// after retries, 5 deadline missed. Anything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Config(_) | EngineError::SecretMissing(_) => 2,
            EngineError::DataUnavailable(_)
            | EngineError::DataGap { .. }
            | EngineError::ProviderTransient { .. }
            | EngineError::Cache(_) => 3,
            EngineError::BrokerTransient { .. }
            | EngineError::BrokerConnectivity { .. }
            | EngineError::Broker { .. }
            | EngineError::OrderRejected { .. }
            | EngineError::BrokerExhausted(_) => 4,
            EngineError::DeadlineExceeded(_) => 5,
            EngineError::InvariantViolation(_) | EngineError::Alert(_) => 1,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        EngineError::InvariantViolation(msg.into())
    }
}
