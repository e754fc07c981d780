//! Collaborator contracts
//!
//! The core talks to its external collaborators (identity lookups,
//! blob persistence) and to the alerting component through these
//! traits. Implementations are injected at construction time.

use crate::error::Result;
use crate::types::{AlertType, ContextMap, DeviceId, DeviceIdentity, Mac, Severity};
use async_trait::async_trait;

/// Read-only device identity collaborator
///
/// Lookups are best-effort: a miss returns `Ok(None)` and the caller
/// falls back to the MAC as friendly name.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn device_identity(&self, mac: &str) -> Result<Option<DeviceIdentity>>;
}

/// Opaque namespaced blob store
///
/// Persistence through this trait is asynchronous and best-effort;
/// storage failures never fail the originating operation.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<String>>;
}

/// Request to raise an alert
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub alert_type: AlertType,
    pub severity: Severity,
    pub device_id: DeviceId,
    pub mac: Mac,
    pub title: String,
    pub description: String,
    pub context: ContextMap,
}

impl AlertRequest {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        device_id: &str,
        mac: &str,
        title: &str,
        description: &str,
    ) -> Self {
        AlertRequest {
            alert_type,
            severity,
            device_id: device_id.to_string(),
            mac: mac.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            context: ContextMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: serde_json::Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }
}

/// Sink for alert creation requests
///
/// Producers (quality monitor, anomaly detector) see only this trait;
/// the engine implements it over the alerting component. Returns the
/// id of the created or merged alert. Suppression surfaces as
/// `Error::Suppressed`.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise_alert(&self, request: AlertRequest) -> Result<String>;
}
