//! Subscriptions and delivery transports

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;
use wtm_common::{DeviceId, Error, EventPriority, EventType, NetworkEvent, Result};

/// How events reach a subscriber
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Websocket,
    Webhook,
    Sse,
    Mqtt,
}

/// Per-subscription event filter
///
/// Empty type and device sets act as wildcards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub event_types: HashSet<EventType>,
    pub device_ids: HashSet<DeviceId>,
    pub min_priority: EventPriority,
    pub include_details: bool,
    /// Minimum interval between deliveries to this subscriber
    pub throttle_interval_secs: u64,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        SubscriptionFilter {
            event_types: HashSet::new(),
            device_ids: HashSet::new(),
            min_priority: EventPriority::Low,
            include_details: true,
            throttle_interval_secs: 0,
        }
    }
}

/// One subscriber registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub client_id: String,
    pub filter: SubscriptionFilter,
    pub method: DeliveryMethod,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub last_delivery: Option<DateTime<Utc>>,
    pub delivered_count: u64,
    pub failure_count: u64,
    pub active: bool,
}

impl Subscription {
    pub fn new(
        client_id: &str,
        filter: SubscriptionFilter,
        method: DeliveryMethod,
        endpoint: &str,
    ) -> Self {
        Subscription {
            id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            filter,
            method,
            endpoint: endpoint.to_string(),
            created_at: Utc::now(),
            last_delivery: None,
            delivered_count: 0,
            failure_count: 0,
            active: true,
        }
    }

    /// Whether the filter admits this event
    pub fn matches(&self, event: &NetworkEvent) -> bool {
        if !self.active {
            return false;
        }
        if !self.filter.event_types.is_empty() && !self.filter.event_types.contains(&event.event_type)
        {
            return false;
        }
        if !self.filter.device_ids.is_empty() && !self.filter.device_ids.contains(&event.device_id) {
            return false;
        }
        event.priority >= self.filter.min_priority
    }

    /// Whether the throttle drops a delivery at `now`
    pub fn throttled(&self, now: DateTime<Utc>) -> bool {
        if self.filter.throttle_interval_secs == 0 {
            return false;
        }
        matches!(
            self.last_delivery,
            Some(last) if now - last < Duration::seconds(self.filter.throttle_interval_secs as i64)
        )
    }

    /// Strip detail payload when the filter asks for summaries only
    pub fn shape_event(&self, event: &NetworkEvent) -> NetworkEvent {
        if self.filter.include_details {
            return event.clone();
        }
        let mut shaped = event.clone();
        shaped.changes.clear();
        shaped.metadata.clear();
        shaped
    }
}

/// Pluggable subscription delivery transport
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    fn method(&self) -> DeliveryMethod;

    async fn deliver(&self, subscription: &Subscription, event: &NetworkEvent) -> Result<()>;
}

/// Webhook delivery: HTTP POST of the event envelope as JSON
pub struct WebhookDelivery {
    client: reqwest::Client,
}

impl WebhookDelivery {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("webhook client build failed: {e}")))?;
        Ok(WebhookDelivery { client })
    }
}

#[async_trait]
impl SubscriptionTransport for WebhookDelivery {
    fn method(&self) -> DeliveryMethod {
        DeliveryMethod::Webhook
    }

    async fn deliver(&self, subscription: &Subscription, event: &NetworkEvent) -> Result<()> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("webhook delivery failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "webhook endpoint returned {}",
                response.status()
            )));
        }
        debug!(
            subscription = %subscription.id,
            event = %event.id,
            "Delivered event via webhook"
        );
        Ok(())
    }
}
