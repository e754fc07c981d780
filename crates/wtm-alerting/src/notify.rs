//! Notification channels, records and transports

use crate::alert::Alert;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wtm_common::{Error, Result, Severity};

/// Where a notification goes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NotificationChannel {
    Log,
    Email { address: String },
    Webhook { url: String },
    Slack { webhook_url: String },
    Sms { number: String },
}

impl NotificationChannel {
    /// Transport registry key for this channel
    pub fn transport_kind(&self) -> &'static str {
        match self {
            NotificationChannel::Log => "log",
            NotificationChannel::Email { .. } => "email",
            NotificationChannel::Webhook { .. } => "webhook",
            NotificationChannel::Slack { .. } => "slack",
            NotificationChannel::Sms { .. } => "sms",
        }
    }

    /// Whether this channel is a chat-style target
    pub fn is_chat(&self) -> bool {
        matches!(self, NotificationChannel::Slack { .. })
    }

    /// Whether this channel is a mail-style target
    pub fn is_mail(&self) -> bool {
        matches!(self, NotificationChannel::Email { .. })
    }
}

/// Delivery state of one notification attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
    Retrying,
}

/// Record of one notification delivery and its retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub alert_id: String,
    pub channel: NotificationChannel,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl NotificationRecord {
    pub fn new(alert_id: &str, channel: NotificationChannel, now: DateTime<Utc>) -> Self {
        NotificationRecord {
            id: Uuid::new_v4().to_string(),
            alert_id: alert_id.to_string(),
            channel,
            status: NotificationStatus::Pending,
            attempts: 0,
            created_at: now,
            last_attempt: None,
            last_error: None,
        }
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = NotificationStatus::Sent;
        self.attempts += 1;
        self.last_attempt = Some(now);
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = NotificationStatus::Failed;
        self.attempts += 1;
        self.last_attempt = Some(now);
        self.last_error = Some(error.to_string());
    }
}

/// Pluggable notification transport
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Registry key, matching [`NotificationChannel::transport_kind`]
    fn kind(&self) -> &'static str;

    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<()>;
}

/// Transport that writes alerts to the log
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, _channel: &NotificationChannel, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::Info => info!("[ALERT] {}: {}", alert.title, alert.description),
            Severity::Warning => warn!("[ALERT] {}: {}", alert.title, alert.description),
            Severity::Error | Severity::Critical => {
                error!("[ALERT] {}: {}", alert.title, alert.description)
            }
        }
        Ok(())
    }
}

/// Transport that POSTs the alert as JSON to a webhook
pub struct WebhookTransport {
    client: reqwest::Client,
}

impl WebhookTransport {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("webhook client build failed: {e}")))?;
        Ok(WebhookTransport { client })
    }
}

#[async_trait]
impl NotificationTransport for WebhookTransport {
    fn kind(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<()> {
        let NotificationChannel::Webhook { url } = channel else {
            return Err(Error::Transport("webhook transport got non-webhook channel".to_string()));
        };
        let payload = serde_json::json!({
            "alert": alert,
            "timestamp": Utc::now(),
        });
        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("webhook request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        debug!("Delivered alert {} via webhook", alert.id);
        Ok(())
    }
}

/// Transport that posts a formatted message to a Slack webhook
pub struct SlackTransport {
    client: reqwest::Client,
}

impl SlackTransport {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("slack client build failed: {e}")))?;
        Ok(SlackTransport { client })
    }

    fn emoji_for(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => ":information_source:",
            Severity::Warning => ":warning:",
            Severity::Error => ":exclamation:",
            Severity::Critical => ":rotating_light:",
        }
    }
}

#[async_trait]
impl NotificationTransport for SlackTransport {
    fn kind(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<()> {
        let NotificationChannel::Slack { webhook_url } = channel else {
            return Err(Error::Transport("slack transport got non-slack channel".to_string()));
        };
        let payload = serde_json::json!({
            "text": format!(
                "{} *{}*\n{}",
                Self::emoji_for(alert.severity),
                alert.title,
                alert.description
            ),
            "username": "Topology Monitor",
        });
        let response = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("slack webhook failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "slack webhook returned status {}",
                response.status()
            )));
        }
        debug!("Delivered alert {} via Slack", alert.id);
        Ok(())
    }
}

/// Mail transport stub that records delivery in the log
///
/// TODO: wire an SMTP relay once the deployment settles on one.
pub struct EmailTransport;

#[async_trait]
impl NotificationTransport for EmailTransport {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn send(&self, channel: &NotificationChannel, alert: &Alert) -> Result<()> {
        let NotificationChannel::Email { address } = channel else {
            return Err(Error::Transport("email transport got non-email channel".to_string()));
        };
        info!("[EMAIL to {}] {}: {}", address, alert.title, alert.description);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wtm_common::{AlertType, ContextMap};

    fn alert() -> Alert {
        Alert::new(
            AlertType::WeakSignal,
            Severity::Warning,
            "ap-1",
            "aa:bb:cc:dd:ee:01",
            "t",
            "d",
            ContextMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn record_tracks_attempts() {
        let now = Utc::now();
        let mut record = NotificationRecord::new("alert-1", NotificationChannel::Log, now);
        assert_eq!(record.status, NotificationStatus::Pending);

        record.mark_failed("boom", now);
        assert_eq!(record.status, NotificationStatus::Failed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.last_error.as_deref(), Some("boom"));

        record.mark_sent(now);
        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.attempts, 2);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn log_transport_always_succeeds() {
        let transport = LogTransport;
        assert!(transport.send(&NotificationChannel::Log, &alert()).await.is_ok());
    }

    #[tokio::test]
    async fn transports_reject_mismatched_channels() {
        let webhook = WebhookTransport::new(std::time::Duration::from_secs(1)).unwrap();
        let err = webhook.send(&NotificationChannel::Log, &alert()).await.unwrap_err();
        assert_eq!(err.category(), "transport");
    }

    #[test]
    fn channel_classification() {
        assert!(NotificationChannel::Slack { webhook_url: "u".to_string() }.is_chat());
        assert!(NotificationChannel::Email { address: "a".to_string() }.is_mail());
        assert_eq!(
            NotificationChannel::Webhook { url: "u".to_string() }.transport_kind(),
            "webhook"
        );
    }
}
