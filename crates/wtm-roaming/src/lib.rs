//! Roaming inference and detection
//!
//! The inference engine turns raw AP-change candidates into confirmed
//! roaming events via weighted rule evaluation and rejects ping-pong
//! oscillations. The detector classifies each confirmed event and
//! maintains per-client roaming state.

pub mod detector;
pub mod inference;

pub use detector::{AnomalyFlag, AnomalyFlagKind, ClientRoamingState, RoamingDetector, RoamingStats};
pub use inference::{
    InferenceDecision, InferenceEngine, RoamingRule, RuleAction, RuleCondition, TransitionRecord,
};
