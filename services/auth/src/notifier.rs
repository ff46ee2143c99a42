//! Outbound notification seam
//!
//! Delivery is best-effort: callers receive an explicit result and decide
//! per call site whether a failure is fatal, ignorable, or triggers a
//! fallback.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Notification delivery failure
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification relay error: {0}")]
    Relay(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Outbound notification sender
#[mockall::automock]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a password reset message carrying the raw token
    async fn send_password_reset(&self, recipient: &str, token: &str) -> Result<(), NotifyError>;
}

/// Sender that hands messages to an HTTP mail relay
pub struct RelaySender {
    client: reqwest::Client,
    relay_url: String,
}

impl RelaySender {
    pub fn new(relay_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
        }
    }
}

#[async_trait]
impl NotificationSender for RelaySender {
    async fn send_password_reset(&self, recipient: &str, token: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "to": recipient,
            "subject": "Reset your Bookbay password",
            "body": format!(
                "A password reset was requested for your account. \
                 Use this token within the next hour: {token}"
            ),
        });

        let response = self
            .client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "relay returned {}",
                response.status()
            )));
        }

        info!("Password reset email handed to relay for {}", recipient);
        Ok(())
    }
}

/// Sender that only logs, for local runs without a mail relay
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send_password_reset(&self, recipient: &str, token: &str) -> Result<(), NotifyError> {
        info!(
            "Password reset requested for {} (token: {})",
            recipient, token
        );
        Ok(())
    }
}
