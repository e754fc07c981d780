//! Runtime wiring for the WiFi topology monitor
//!
//! Constructs the collector, session tracker, roaming pipeline,
//! quality monitor, anomaly detector, alerting system and realtime
//! bus, and connects them with the channel and adapter plumbing the
//! components expect.

pub mod adapters;
pub mod engine;
pub mod store;
pub mod topology;

pub use engine::{Engine, EngineStats};
pub use store::{MemoryStore, SledStore, StaticIdentityProvider};
pub use topology::{NodeKind, TopologyEdge, TopologyGraph, TopologyNode};
