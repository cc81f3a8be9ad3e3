// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator alerts.
//!
//! Alerts are best-effort: the store awaits each one under a timeout and
//! only logs a failure, so a broken mail relay never changes the outcome of
//! a store operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("failed to build message: {0}")]
    Message(String),

    #[error("smtp transport error: {0}")]
    Transport(String),
}

/// One alert as delivered to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
}

/// Alert sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// SMTP relay settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server host (e.g. "smtp.gmail.com")
    #[serde(default = "default_smtp_server")]
    pub server: String,

    /// STARTTLS submission port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Login and From address
    pub sender: String,

    /// App password for `sender`
    pub password: String,

    /// Recipient; defaults to the sender
    #[serde(default)]
    pub receiver: Option<String>,
}

fn default_smtp_server() -> String { "smtp.gmail.com".to_string() }
fn default_smtp_port() -> u16 { 587 }

impl SmtpConfig {
    pub fn new(sender: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            sender: sender.into(),
            password: password.into(),
            receiver: None,
        }
    }

    pub fn recipient(&self) -> &str {
        self.receiver.as_deref().unwrap_or(&self.sender)
    }
}

/// Sends alerts as plain-text mail through a STARTTLS relay.
pub struct SmtpNotifier {
    config: SmtpConfig,
    mailer: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{AsyncSmtpTransport, Tokio1Executor};

        let creds = Credentials::new(config.sender.clone(), config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { config, mailer })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn alert(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        use lettre::{message::header::ContentType, AsyncTransport, Message};

        let email = Message::builder()
            .from(
                self.config
                    .sender
                    .parse()
                    .map_err(|e| NotifyError::Address(format!("Invalid from address: {}", e)))?,
            )
            .to(self
                .config
                .recipient()
                .parse()
                .map_err(|e| NotifyError::Address(format!("Invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        info!(subject, "Notification sent");
        Ok(())
    }
}

/// Writes alerts to the log. Used when no mail relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn alert(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        warn!(subject, body, "Alert (no mail relay configured)");
        Ok(())
    }
}

/// Keeps alerts in memory so hosts can assert on them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every alert and then reports a delivery failure.
    pub fn failing() -> Self {
        Self { alerts: Mutex::new(Vec::new()), fail: true }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Alerts whose subject contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.alerts.lock().iter().filter(|a| a.subject.contains(needle)).count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn alert(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        self.alerts.lock().push(Alert {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        if self.fail {
            return Err(NotifyError::Transport("relay unreachable".into()));
        }
        Ok(())
    }
}
