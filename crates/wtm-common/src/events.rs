//! Event envelope for the realtime bus

use crate::types::{ContextMap, DeviceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event categories carried on the bus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TopologyChanged,
    DeviceOnline,
    DeviceOffline,
    ConnectionAdded,
    ConnectionRemoved,
    RoamingDetected,
    AnomalyDetected,
    AlertRaised,
    QualityChanged,
    #[serde(other)]
    Unknown,
}

/// Delivery priority of an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

/// One field-level change carried by an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventChange {
    pub change_type: String,
    pub field: String,
    pub old: serde_json::Value,
    pub new: serde_json::Value,
    pub description: String,
    pub impact: String,
}

/// Trigger context attached to an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    pub trigger_reason: String,
    pub affected_devices: Vec<DeviceId>,
    #[serde(flatten)]
    pub extra: ContextMap,
}

/// Envelope published to the realtime bus and delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub device_id: DeviceId,
    #[serde(default)]
    pub priority: EventPriority,
    #[serde(default)]
    pub changes: Vec<EventChange>,
    #[serde(default)]
    pub context: EventContext,
    #[serde(default)]
    pub metadata: ContextMap,
}

impl NetworkEvent {
    /// Create a stamped event with the given type, source and device
    pub fn new(event_type: EventType, source: &str, device_id: &str) -> Self {
        NetworkEvent {
            id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            source: source.to_string(),
            device_id: device_id.to_string(),
            priority: EventPriority::Normal,
            changes: Vec::new(),
            context: EventContext::default(),
            metadata: ContextMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.context.trigger_reason = reason.to_string();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Fill in id and timestamp when the producer left them blank
    pub fn ensure_stamped(&mut self) {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.timestamp.timestamp() == 0 {
            self.timestamp = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_snake_case_type() {
        let event = NetworkEvent::new(EventType::RoamingDetected, "roaming", "ap-1")
            .with_priority(EventPriority::High)
            .with_reason("signal improvement");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "roaming_detected");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["context"]["trigger_reason"], "signal improvement");
    }

    #[test]
    fn unknown_event_type_maps_to_unknown() {
        let raw = r#"{
            "id": "e-1",
            "type": "hyperspace_jump",
            "source": "test",
            "device_id": "ap-1"
        }"#;
        let event: NetworkEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, EventType::Unknown);
    }

    #[test]
    fn ensure_stamped_fills_blank_id() {
        let mut event = NetworkEvent::new(EventType::DeviceOnline, "collector", "ap-2");
        event.id.clear();
        event.ensure_stamped();
        assert!(!event.id.is_empty());
    }

    #[test]
    fn priority_ordering_supports_filters() {
        assert!(EventPriority::Critical > EventPriority::Normal);
        assert!(EventPriority::Low < EventPriority::High);
    }
}
