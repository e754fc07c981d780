//! Shared domain types for the WiFi topology monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for controller-managed devices (APs)
pub type DeviceId = String;

/// Normalized client MAC address (lowercase, colon-separated)
pub type Mac = String;

/// Alert and notification severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Connection quality grade, the stepwise image of a [0, 1] score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl QualityGrade {
    /// Map an overall quality score onto its grade
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityGrade::Excellent
        } else if score >= 0.6 {
            QualityGrade::Good
        } else if score >= 0.4 {
            QualityGrade::Fair
        } else if score >= 0.2 {
            QualityGrade::Poor
        } else {
            QualityGrade::Critical
        }
    }
}

/// Grade of a single roaming transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoamGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl RoamGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            RoamGrade::Excellent
        } else if score >= 0.6 {
            RoamGrade::Good
        } else if score >= 0.4 {
            RoamGrade::Fair
        } else {
            RoamGrade::Poor
        }
    }
}

/// Inferred cause category of a roaming transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoamType {
    SignalDriven,
    LoadBalancing,
    BandSteering,
    Forced,
    Manual,
    #[serde(other)]
    Unknown,
}

/// Concrete trigger of a roaming transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoamTrigger {
    WeakSignal,
    BetterSignal,
    HighLoad,
    Interference,
    ApFailure,
    UserMovement,
    #[serde(other)]
    Unknown,
}

impl RoamTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoamTrigger::WeakSignal => "weak_signal",
            RoamTrigger::BetterSignal => "better_signal",
            RoamTrigger::HighLoad => "high_load",
            RoamTrigger::Interference => "interference",
            RoamTrigger::ApFailure => "ap_failure",
            RoamTrigger::UserMovement => "user_movement",
            RoamTrigger::Unknown => "unknown",
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Roamed,
    Timeout,
    Deauthenticated,
    SignalLost,
    ApFailure,
    #[serde(other)]
    Unknown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Roamed => "roamed",
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Deauthenticated => "deauthenticated",
            DisconnectReason::SignalLost => "signal_lost",
            DisconnectReason::ApFailure => "ap_failure",
            DisconnectReason::Unknown => "unknown",
        }
    }
}

/// One signal measurement for a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPoint {
    pub timestamp: DateTime<Utc>,
    /// Received signal strength in dBm (negative)
    pub rssi: i32,
    pub noise_floor: Option<i32>,
    pub tx_rate: Option<u64>,
    pub rx_rate: Option<u64>,
    pub ap_id: DeviceId,
    /// Derived quality in [0, 1]
    pub quality: f64,
}

impl SignalPoint {
    /// Linear RSSI-to-quality mapping: -50 dBm or better maps to 1.0,
    /// -90 dBm or worse to 0.0
    pub fn quality_for_rssi(rssi: i32) -> f64 {
        if rssi >= -50 {
            1.0
        } else if rssi <= -90 {
            0.0
        } else {
            (rssi + 90) as f64 / 40.0
        }
    }
}

/// AP descriptor from the ingest contract
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApDescriptor {
    pub ssid: String,
    pub bssid: String,
    pub channel: u32,
    pub band: String,
    pub max_clients: u32,
}

/// Client descriptor from the ingest contract
///
/// Only the MAC is required; every other field is tolerated missing
/// and unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientDescriptor {
    pub mac_address: String,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    pub connected_at_ms: Option<u64>,
    pub rssi: Option<i32>,
    pub signal_strength: Option<i32>,
    pub noise_level: Option<i32>,
    pub tx_rate: Option<u64>,
    pub rx_rate: Option<u64>,
    pub tx_bytes: Option<u64>,
    pub rx_bytes: Option<u64>,
    pub tx_packets: Option<u64>,
    pub rx_packets: Option<u64>,
    pub connection_time: Option<u64>,
    pub capabilities: Vec<String>,
}

impl ClientDescriptor {
    /// RSSI with the `signal_strength` alias as fallback
    pub fn effective_rssi(&self) -> Option<i32> {
        self.rssi.or(self.signal_strength)
    }
}

/// Identity record from the identity collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub mac: Mac,
    pub friendly_name: String,
    pub device_type: String,
    pub manufacturer: String,
    pub model: String,
    pub category: String,
    pub tags: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Raw AP-change candidate emitted by the collector
#[derive(Debug, Clone)]
pub struct ApChangeCandidate {
    pub client_mac: Mac,
    pub from_ap: DeviceId,
    pub to_ap: DeviceId,
    pub from_ssid: String,
    pub to_ssid: String,
    /// Last RSSI observed on the previous AP
    pub prior_rssi: i32,
    /// RSSI observed on the new AP
    pub current_rssi: i32,
    /// When the association with the previous AP started
    pub connected_since: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Environment snapshot captured alongside a roaming decision
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoamingContext {
    /// Estimated network load in [0, 1]
    pub network_load: f64,
    pub hour_of_day: u8,
    /// Monday = 0 .. Sunday = 6
    pub weekday: u8,
    pub client_count: usize,
}

/// A confirmed, classified roaming transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoamingEvent {
    pub id: String,
    pub client_mac: Mac,
    pub from_ap: DeviceId,
    pub to_ap: DeviceId,
    pub from_ssid: String,
    pub to_ssid: String,
    pub timestamp: DateTime<Utc>,
    /// Time since the prior session on the old AP started, in milliseconds
    pub duration_ms: i64,
    pub signal_before: i32,
    pub signal_after: i32,
    pub roam_type: RoamType,
    pub trigger: RoamTrigger,
    /// Inference confidence in [0, 1]
    pub confidence: f64,
    pub grade: RoamGrade,
    pub anomalous: bool,
    pub context: RoamingContext,
}

/// Alert classification used for dedup keys and routing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    WeakSignal,
    HighLatency,
    PacketLoss,
    LowThroughput,
    HighJitter,
    QualityDegraded,
    QualityVolatile,
    ExcessiveRoaming,
    PingPong,
    StuckClient,
    UnusualPattern,
    SignalAnomaly,
    TimeAnomaly,
    DeviceOffline,
    DeviceOnline,
    ConnectionLost,
    #[serde(other)]
    Unknown,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::WeakSignal => "weak_signal",
            AlertType::HighLatency => "high_latency",
            AlertType::PacketLoss => "packet_loss",
            AlertType::LowThroughput => "low_throughput",
            AlertType::HighJitter => "high_jitter",
            AlertType::QualityDegraded => "quality_degraded",
            AlertType::QualityVolatile => "quality_volatile",
            AlertType::ExcessiveRoaming => "excessive_roaming",
            AlertType::PingPong => "ping_pong",
            AlertType::StuckClient => "stuck_client",
            AlertType::UnusualPattern => "unusual_pattern",
            AlertType::SignalAnomaly => "signal_anomaly",
            AlertType::TimeAnomaly => "time_anomaly",
            AlertType::DeviceOffline => "device_offline",
            AlertType::DeviceOnline => "device_online",
            AlertType::ConnectionLost => "connection_lost",
            AlertType::Unknown => "unknown",
        }
    }
}

/// Category a type of anomaly belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    ExcessiveRoaming,
    PingPong,
    StuckClient,
    UnusualPattern,
    SignalAnomaly,
    TimeAnomaly,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::ExcessiveRoaming => "excessive_roaming",
            AnomalyType::PingPong => "ping_pong",
            AnomalyType::StuckClient => "stuck_client",
            AnomalyType::UnusualPattern => "unusual_pattern",
            AnomalyType::SignalAnomaly => "signal_anomaly",
            AnomalyType::TimeAnomaly => "time_anomaly",
        }
    }

    /// Alert type this anomaly maps to when forwarded to alerting
    pub fn alert_type(&self) -> AlertType {
        match self {
            AnomalyType::ExcessiveRoaming => AlertType::ExcessiveRoaming,
            AnomalyType::PingPong => AlertType::PingPong,
            AnomalyType::StuckClient => AlertType::StuckClient,
            AnomalyType::UnusualPattern => AlertType::UnusualPattern,
            AnomalyType::SignalAnomaly => AlertType::SignalAnomaly,
            AnomalyType::TimeAnomaly => AlertType::TimeAnomaly,
        }
    }
}

/// Anomaly severity ladder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AnomalySeverity {
    /// Derive severity from a sigma deviation
    pub fn from_deviation(deviation: f64) -> Self {
        let d = deviation.abs();
        if d > 4.0 {
            AnomalySeverity::Critical
        } else if d > 3.0 {
            AnomalySeverity::High
        } else if d > 2.0 {
            AnomalySeverity::Medium
        } else {
            AnomalySeverity::Low
        }
    }

    /// Alerting severity this anomaly severity maps to
    pub fn alert_severity(&self) -> Severity {
        match self {
            AnomalySeverity::Low => Severity::Info,
            AnomalySeverity::Medium => Severity::Warning,
            AnomalySeverity::High => Severity::Error,
            AnomalySeverity::Critical => Severity::Critical,
        }
    }
}

/// Generic key/value context snapshot carried on alerts and events
pub type ContextMap = HashMap<String, serde_json::Value>;
