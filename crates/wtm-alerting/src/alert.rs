//! Alert records and lifecycle

use crate::notify::NotificationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wtm_common::{AlertType, ContextMap, DeviceId, Mac, Severity};

/// Lifecycle state of an alert
///
/// Progression is open, acknowledged, in_progress, resolved, closed;
/// suppressed is entered only at creation time when a suppression
/// matches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    InProgress,
    Resolved,
    Closed,
    Suppressed,
}

impl AlertStatus {
    /// Whether the alert still participates in dedup and escalation
    pub fn is_active(&self) -> bool {
        matches!(self, AlertStatus::Open | AlertStatus::Acknowledged | AlertStatus::InProgress)
    }
}

/// One alert instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub device_id: DeviceId,
    pub mac: Mac,
    pub title: String,
    pub description: String,
    pub category: String,
    pub urgency: String,
    pub impact: String,
    pub escalation_level: u32,
    pub escalated: bool,
    /// Occurrences merged into this alert, including the first
    pub frequency: u64,
    pub created_at: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub recommended_actions: Vec<String>,
    pub notifications: Vec<NotificationRecord>,
    pub related_alert_ids: Vec<String>,
    pub tags: Vec<String>,
    pub context: ContextMap,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        device_id: &str,
        mac: &str,
        title: &str,
        description: &str,
        context: ContextMap,
        now: DateTime<Utc>,
    ) -> Self {
        Alert {
            id: Uuid::new_v4().to_string(),
            alert_type,
            severity,
            status: AlertStatus::Open,
            device_id: device_id.to_string(),
            mac: mac.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            category: Self::category_of(alert_type).to_string(),
            urgency: Self::urgency_of(severity, alert_type).to_string(),
            impact: Self::impact_of(severity).to_string(),
            escalation_level: 0,
            escalated: false,
            frequency: 1,
            created_at: now,
            last_occurrence: now,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            recommended_actions: Self::actions_of(alert_type),
            notifications: Vec::new(),
            related_alert_ids: Vec::new(),
            tags: Vec::new(),
            context,
        }
    }

    /// Merge a duplicate occurrence into this alert
    pub fn merge_occurrence(&mut self, now: DateTime<Utc>) {
        self.frequency += 1;
        self.last_occurrence = now;
    }

    fn category_of(alert_type: AlertType) -> &'static str {
        match alert_type {
            AlertType::WeakSignal | AlertType::SignalAnomaly => "signal",
            AlertType::HighLatency
            | AlertType::PacketLoss
            | AlertType::LowThroughput
            | AlertType::HighJitter => "performance",
            AlertType::QualityDegraded | AlertType::QualityVolatile => "quality",
            AlertType::ExcessiveRoaming | AlertType::PingPong | AlertType::StuckClient => "roaming",
            AlertType::UnusualPattern | AlertType::TimeAnomaly => "behavior",
            AlertType::DeviceOffline | AlertType::DeviceOnline | AlertType::ConnectionLost => {
                "availability"
            }
            AlertType::Unknown => "general",
        }
    }

    fn urgency_of(severity: Severity, alert_type: AlertType) -> &'static str {
        match (severity, alert_type) {
            (Severity::Critical, _) => "immediate",
            (Severity::Error, AlertType::DeviceOffline | AlertType::ConnectionLost) => "immediate",
            (Severity::Error, _) => "high",
            (Severity::Warning, _) => "normal",
            (Severity::Info, _) => "low",
        }
    }

    fn impact_of(severity: Severity) -> &'static str {
        match severity {
            Severity::Critical => "service outage likely for affected clients",
            Severity::Error => "noticeable degradation for affected clients",
            Severity::Warning => "quality reduced, service functional",
            Severity::Info => "informational, no user impact",
        }
    }

    fn actions_of(alert_type: AlertType) -> Vec<String> {
        match alert_type {
            AlertType::WeakSignal => vec![
                "Check client distance from the serving AP".to_string(),
                "Review AP placement and transmit power".to_string(),
            ],
            AlertType::HighLatency | AlertType::HighJitter => vec![
                "Inspect channel utilization on the serving AP".to_string(),
                "Check for airtime-hungry neighbors".to_string(),
            ],
            AlertType::PacketLoss => vec![
                "Look for co-channel interference".to_string(),
                "Verify wired backhaul health".to_string(),
            ],
            AlertType::LowThroughput => vec![
                "Confirm the client negotiated the expected PHY rate".to_string(),
            ],
            AlertType::QualityDegraded | AlertType::QualityVolatile => vec![
                "Review the pair's quality snapshots for the drop point".to_string(),
            ],
            AlertType::ExcessiveRoaming | AlertType::PingPong => vec![
                "Adjust roaming thresholds or cell overlap".to_string(),
            ],
            AlertType::StuckClient => vec![
                "Verify the client honors BSS transition management".to_string(),
            ],
            AlertType::DeviceOffline | AlertType::ConnectionLost => vec![
                "Check power and uplink of the device".to_string(),
            ],
            _ => vec!["Inspect recent telemetry for the subject".to_string()],
        }
    }
}
