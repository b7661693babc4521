// src/broker/alpaca.rs
// Alpaca-style brokerage REST client. One type serves both the primary and
// the secondary venue; only the endpoint name, base URL, and credentials
// differ. Errors are classified so the executor can retry transients and
// fail over on connectivity loss.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{AccountSnapshot, BrokerClient, Fill, OrderSide, OrderStatus, Position};
use crate::error::EngineError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AlpacaBroker {
    client: Client,
    name: String,
    base_url: String,
    key_id: String,
    key_secret: String,
}

// ============ Wire types ============
// Alpaca quotes numeric fields as strings; parse at the boundary.

#[derive(Debug, Deserialize)]
struct AccountWire {
    equity: String,
    cash: String,
}

#[derive(Debug, Deserialize)]
struct PositionWire {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    market_value: String,
}

#[derive(Debug, Deserialize)]
struct OrderWire {
    id: String,
    symbol: String,
    side: String,
    filled_qty: String,
    filled_avg_price: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ClockWire {
    is_open: bool,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    symbol: &'a str,
    qty: u64,
    side: OrderSide,
    r#type: &'a str,
    time_in_force: &'a str,
}

impl AlpacaBroker {
    pub fn new(
        name: String,
        base_url: String,
        key_id: String,
        key_secret: String,
    ) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::config(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            name,
            base_url,
            key_id,
            key_secret,
        })
    }

    fn build_headers(&self) -> Result<header::HeaderMap, EngineError> {
        let mut headers = header::HeaderMap::new();
        let parse = |v: &str| {
            v.parse()
                .map_err(|_| EngineError::config("credential is not header-safe".to_string()))
        };
        headers.insert("APCA-API-KEY-ID", parse(&self.key_id)?);
        headers.insert("APCA-API-SECRET-KEY", parse(&self.key_secret)?);
        Ok(headers)
    }

    fn classify_send_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_connect() || e.is_timeout() {
            EngineError::BrokerConnectivity {
                broker: self.name.clone(),
                message: e.to_string(),
            }
        } else {
            EngineError::BrokerTransient {
                broker: self.name.clone(),
                message: e.to_string(),
            }
        }
    }

    fn classify_status(&self, status: StatusCode, body: String) -> EngineError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            EngineError::BrokerTransient {
                broker: self.name.clone(),
                message: format!("HTTP {}: {}", status, body),
            }
        } else {
            EngineError::Broker {
                broker: self.name.clone(),
                message: format!("HTTP {}: {}", status, body),
            }
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&impl Serialize>,
    ) -> Result<T, EngineError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self
            .client
            .request(method, &url)
            .headers(self.build_headers()?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, body));
        }
        response.json().await.map_err(|e| EngineError::Broker {
            broker: self.name.clone(),
            message: format!("bad payload: {}", e),
        })
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, EngineError> {
        self.request(reqwest::Method::GET, endpoint, None::<&()>)
            .await
    }

    fn parse_decimal(&self, value: &str, field: &str) -> Result<Decimal, EngineError> {
        value.parse().map_err(|_| EngineError::Broker {
            broker: self.name.clone(),
            message: format!("unparseable {} '{}'", field, value),
        })
    }

    fn parse_quantity(&self, value: &str, field: &str) -> Result<i64, EngineError> {
        // Quantities arrive as decimal strings; the core trades whole shares.
        let parsed = self.parse_decimal(value, field)?;
        Ok(parsed.trunc().to_i64().unwrap_or(0))
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "filled" => OrderStatus::Filled,
            "partially_filled" => OrderStatus::Partial,
            "rejected" | "denied" => OrderStatus::Rejected,
            "canceled" | "expired" | "done_for_day" => OrderStatus::Canceled,
            _ => OrderStatus::Pending,
        }
    }

    fn map_order(&self, wire: OrderWire) -> Result<Fill, EngineError> {
        let side = match wire.side.as_str() {
            "sell" => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let filled_quantity = self.parse_quantity(&wire.filled_qty, "filled_qty")? as u64;
        let avg_fill_price = match wire.filled_avg_price {
            Some(px) => self.parse_decimal(&px, "filled_avg_price")?,
            None => Decimal::ZERO,
        };
        Ok(Fill {
            order_id: wire.id,
            symbol: wire.symbol,
            side,
            filled_quantity,
            avg_fill_price,
            status: Self::map_status(&wire.status),
        })
    }
}

#[async_trait]
impl BrokerClient for AlpacaBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_account(&self) -> Result<AccountSnapshot, EngineError> {
        let account: AccountWire = self.get("/v2/account").await?;
        let positions: Vec<PositionWire> = self.get("/v2/positions").await?;

        let mut snapshot = AccountSnapshot {
            equity: self.parse_decimal(&account.equity, "equity")?,
            cash: self.parse_decimal(&account.cash, "cash")?,
            positions: Default::default(),
        };
        for wire in positions {
            let position = Position {
                quantity: self.parse_quantity(&wire.qty, "qty")?,
                avg_cost: self.parse_decimal(&wire.avg_entry_price, "avg_entry_price")?,
                market_value: self.parse_decimal(&wire.market_value, "market_value")?,
                symbol: wire.symbol,
            };
            snapshot.positions.insert(position.symbol.clone(), position);
        }
        Ok(snapshot)
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
    ) -> Result<String, EngineError> {
        if quantity == 0 {
            return Err(EngineError::invariant("zero-quantity order".to_string()));
        }
        let request = OrderRequest {
            symbol,
            qty: quantity,
            side,
            r#type: "market",
            time_in_force: "day",
        };
        let result: Result<OrderWire, EngineError> = self
            .request(reqwest::Method::POST, "/v2/orders", Some(&request))
            .await;
        match result {
            Ok(order) => Ok(order.id),
            // 403 from the order endpoint means buying power or a halted
            // symbol: final for this order, the plan continues.
            Err(EngineError::Broker { message, .. }) if message.contains("HTTP 403") => {
                Err(EngineError::OrderRejected {
                    symbol: symbol.to_string(),
                    reason: message,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn poll_order(&self, order_id: &str) -> Result<Fill, EngineError> {
        let wire: OrderWire = self.get(&format!("/v2/orders/{}", order_id)).await?;
        self.map_order(wire)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, EngineError> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let response = self
            .client
            .delete(&url)
            .headers(self.build_headers()?)
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;
        // 404/422 mean the order is already terminal; that is not a failure.
        Ok(response.status().is_success())
    }

    async fn is_market_open(&self) -> Result<bool, EngineError> {
        let clock: ClockWire = self.get("/v2/clock").await?;
        Ok(clock.is_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AlpacaBroker::map_status("filled"), OrderStatus::Filled);
        assert_eq!(
            AlpacaBroker::map_status("partially_filled"),
            OrderStatus::Partial
        );
        assert_eq!(AlpacaBroker::map_status("rejected"), OrderStatus::Rejected);
        assert_eq!(AlpacaBroker::map_status("expired"), OrderStatus::Canceled);
        assert_eq!(AlpacaBroker::map_status("new"), OrderStatus::Pending);
        assert_eq!(
            AlpacaBroker::map_status("pending_new"),
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    #[ignore] // Only run when ALPACA_API_KEY and ALPACA_API_SECRET are set
    async fn test_get_account_live() {
        let broker = AlpacaBroker::new(
            "alpaca-paper".to_string(),
            "https://paper-api.alpaca.markets".to_string(),
            std::env::var("ALPACA_API_KEY").unwrap(),
            std::env::var("ALPACA_API_SECRET").unwrap(),
        )
        .unwrap();
        let snapshot = broker.get_account().await.expect("failed to get account");
        assert!(snapshot.equity >= Decimal::ZERO);
    }
}
