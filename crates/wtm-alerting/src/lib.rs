//! Topology alerting system
//!
//! Turns threshold violations and anomalies into deduplicated,
//! suppressible, escalatable alerts fanned out to notification
//! channels. Transports are pluggable; the manager only knows the
//! delivery contract.

pub mod alert;
pub mod escalation;
pub mod manager;
pub mod notify;
pub mod rules;
pub mod suppression;

pub use alert::{Alert, AlertStatus};
pub use escalation::{AlertEscalation, EscalationChain, EscalationStep};
pub use manager::{AlertManager, AlertStats};
pub use notify::{
    LogTransport, NotificationChannel, NotificationRecord, NotificationStatus,
    NotificationTransport, SlackTransport, WebhookTransport,
};
pub use rules::{AlertRule, ConditionLogic, EvaluationContext, RuleAction, RuleCondition, RuleContextProvider, ThresholdOp};
pub use suppression::AlertSuppression;
