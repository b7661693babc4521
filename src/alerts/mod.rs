// Alert transports.
//
// Delivery is best-effort: transport failures are logged and never abort a
// session. The hub fans one alert out to every configured sender.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{error, info, warn};
use serde::Serialize;

use crate::config::EmailAlertConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warn => f.write_str("WARN"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// Alert transport capability.
#[async_trait]
pub trait AlertSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EngineError>;
}

/// Writes alerts to the process log. Always configured as a floor.
pub struct LogAlerter;

#[async_trait]
impl AlertSender for LogAlerter {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EngineError> {
        match severity {
            Severity::Info => info!("[alert] {}: {}", title, body),
            Severity::Warn => warn!("[alert] {}: {}", title, body),
            Severity::Critical => error!("[alert] {}: {}", title, body),
        }
        Ok(())
    }
}

/// JSON POST to a push-service or chat-bot endpoint.
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    severity: Severity,
    title: &'a str,
    body: &'a str,
}

impl WebhookAlerter {
    pub fn new(url: String) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::config(format!("cannot build http client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl AlertSender for WebhookAlerter {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EngineError> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                severity,
                title,
                body,
            })
            .send()
            .await
            .map_err(|e| EngineError::Alert(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::Alert(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// SMTP email transport.
pub struct EmailAlerter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl EmailAlerter {
    pub fn new(
        config: &EmailAlertConfig,
        username: String,
        password: String,
    ) -> Result<Self, EngineError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| EngineError::config(format!("bad smtp host: {}", e)))?
            .credentials(Credentials::new(username, password))
            .build();
        let parse = |addr: &str| -> Result<Mailbox, EngineError> {
            addr.parse()
                .map_err(|e| EngineError::config(format!("bad mailbox '{}': {}", addr, e)))
        };
        Ok(Self {
            transport,
            from: parse(&config.from)?,
            to: parse(&config.to)?,
        })
    }
}

#[async_trait]
impl AlertSender for EmailAlerter {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(
        &self,
        severity: Severity,
        title: &str,
        body: &str,
    ) -> Result<(), EngineError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!("[whitelight {}] {}", severity, title))
            .body(body.to_string())
            .map_err(|e| EngineError::Alert(e.to_string()))?;
        self.transport
            .send(message)
            .await
            .map_err(|e| EngineError::Alert(e.to_string()))?;
        Ok(())
    }
}

/// Discards alerts; used by tests and the replay.
pub struct NoopAlerter;

#[async_trait]
impl AlertSender for NoopAlerter {
    fn name(&self) -> &str {
        "noop"
    }

    async fn send(&self, _: Severity, _: &str, _: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Fans an alert out to every configured transport. Failures are logged,
/// never propagated.
pub struct AlertHub {
    senders: Vec<Box<dyn AlertSender>>,
}

impl AlertHub {
    pub fn new(senders: Vec<Box<dyn AlertSender>>) -> Self {
        Self { senders }
    }

    pub async fn broadcast(&self, severity: Severity, title: &str, body: &str) {
        for sender in &self.senders {
            if let Err(e) = sender.send(severity, title, body).await {
                warn!("alert via {} failed: {}", sender.name(), e);
            }
        }
    }
}
