//! Behavioral baselines and anomaly detection
//!
//! Learns a per-client statistical fingerprint from session history
//! and flags statistical, pattern and feature-based deviations with
//! attached evidence. Baseline-dependent detection never runs before
//! the learning gate is met.

pub mod baseline;
pub mod case;
pub mod detector;

pub use baseline::BaselineProfile;
pub use case::{AnomalyCase, AnomalyStatus, Evidence, Resolution};
pub use detector::{
    AnomalyDetector, AnomalyStats, RoamingHistoryProvider, SessionSummary, TelemetryProvider,
    TransitionSample,
};
