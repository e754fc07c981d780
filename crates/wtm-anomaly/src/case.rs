//! Anomaly case records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wtm_common::{AnomalySeverity, AnomalyType, Mac};

/// Lifecycle state of a case
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Active,
    Resolved,
    Ignored,
    Pending,
}

/// One piece of supporting evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub value: f64,
    pub baseline: f64,
    pub deviation: f64,
    pub description: String,
    pub confidence: f64,
}

/// How a case was closed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved_at: DateTime<Utc>,
    pub actor: String,
    pub reason: String,
}

/// A deduplicated anomaly occurrence for one client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyCase {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub mac: Mac,
    pub severity: AnomalySeverity,
    pub status: AnomalyStatus,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub occurrence_count: u64,
    pub evidence: Vec<Evidence>,
    pub impact: String,
    pub recommended_actions: Vec<String>,
    pub resolution: Option<Resolution>,
}

impl AnomalyCase {
    pub fn new(
        anomaly_type: AnomalyType,
        mac: &str,
        severity: AnomalySeverity,
        evidence: Vec<Evidence>,
        now: DateTime<Utc>,
    ) -> Self {
        AnomalyCase {
            id: Uuid::new_v4().to_string(),
            anomaly_type,
            mac: mac.to_string(),
            severity,
            status: AnomalyStatus::Active,
            first_occurrence: now,
            last_occurrence: now,
            occurrence_count: 1,
            evidence,
            impact: Self::impact_of(anomaly_type),
            recommended_actions: Self::actions_of(anomaly_type),
            resolution: None,
        }
    }

    /// Fold a re-detection into this case
    pub fn merge(&mut self, severity: AnomalySeverity, evidence: Vec<Evidence>, now: DateTime<Utc>) {
        self.occurrence_count += 1;
        self.last_occurrence = now;
        if severity > self.severity {
            self.severity = severity;
        }
        self.evidence.extend(evidence);
    }

    pub fn resolve(&mut self, actor: &str, reason: &str, now: DateTime<Utc>) {
        self.status = AnomalyStatus::Resolved;
        self.resolution = Some(Resolution {
            resolved_at: now,
            actor: actor.to_string(),
            reason: reason.to_string(),
        });
    }

    fn impact_of(anomaly_type: AnomalyType) -> String {
        match anomaly_type {
            AnomalyType::ExcessiveRoaming => {
                "Frequent handovers interrupt traffic and drain the client battery".to_string()
            }
            AnomalyType::PingPong => {
                "Oscillation between two APs causes repeated re-association outages".to_string()
            }
            AnomalyType::StuckClient => {
                "Client clings to a weak AP instead of roaming to better coverage".to_string()
            }
            AnomalyType::UnusualPattern => {
                "Roaming behavior departs from this client's learned profile".to_string()
            }
            AnomalyType::SignalAnomaly => {
                "Signal quality fell well below this client's learned norm".to_string()
            }
            AnomalyType::TimeAnomaly => {
                "Activity occurs outside this client's usual time windows".to_string()
            }
        }
    }

    fn actions_of(anomaly_type: AnomalyType) -> Vec<String> {
        match anomaly_type {
            AnomalyType::ExcessiveRoaming => vec![
                "Review AP transmit power and cell overlap".to_string(),
                "Check 802.11k/v/r configuration consistency".to_string(),
            ],
            AnomalyType::PingPong => vec![
                "Increase the roaming hysteresis between the two APs".to_string(),
                "Rebalance transmit power where the cells overlap".to_string(),
            ],
            AnomalyType::StuckClient => vec![
                "Verify the client driver honors BSS transition requests".to_string(),
                "Consider lowering the minimum basic rate on the serving AP".to_string(),
            ],
            AnomalyType::UnusualPattern => vec![
                "Inspect recent roaming history for the client".to_string(),
            ],
            AnomalyType::SignalAnomaly => vec![
                "Check for new interference sources or moved furniture".to_string(),
                "Validate AP antenna orientation".to_string(),
            ],
            AnomalyType::TimeAnomaly => vec![
                "Confirm the activity is expected for this device".to_string(),
            ],
        }
    }
}
