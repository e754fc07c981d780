//! Connection history tracker
//!
//! Opens and closes sessions on (client, AP) transitions and keeps
//! per-client session history with quality rollups, behavioral
//! patterns and reliability metrics.

pub mod session;
pub mod tracker;

pub use session::{
    ClientPreferences, ClientProfile, ReliabilityMetrics, ReliabilityReport, Session,
    SessionActivity, SessionContext, SessionPatterns,
};
pub use tracker::{ConnectionTracker, SessionStats};
