//! Client telemetry collector
//!
//! Ingests per-AP client telemetry, maintains per-client signal
//! history and per-AP client rosters, and emits raw AP-change
//! candidates for the roaming pipeline.

pub mod client_state;
pub mod collector;
pub mod roster;

pub use client_state::{ApConnection, ClientRecord};
pub use collector::{ClientCollector, CollectorStats, IngestSummary};
pub use roster::{AccessPointState, ApClientInfo};
