//! Common types and utilities for the WiFi topology monitor
//!
//! This crate provides the shared configuration, error type, domain
//! types, event envelope and collaborator contracts used across all
//! components of the monitoring core.

pub mod collab;
pub mod config;
pub mod error;
pub mod events;
pub mod types;
pub mod utils;

pub use collab::{AlertRequest, AlertSink, BlobStore, IdentityProvider};
pub use config::{
    AlertingConfig, AnomalyConfig, CollectorConfig, Config, MetricThresholds, QualityConfig,
    QualityThresholds, RealtimeConfig, RoamingConfig, SessionConfig,
};
pub use error::{Error, Result};
pub use events::{EventChange, EventContext, EventPriority, EventType, NetworkEvent};
pub use types::*;
