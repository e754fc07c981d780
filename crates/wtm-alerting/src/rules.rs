//! Alert rules and their evaluation

use crate::escalation::EscalationChain;
use crate::notify::NotificationChannel;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;
use wtm_common::{AlertType, Severity};

/// Comparison operator for threshold conditions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOp {
    Above,
    Below,
    Equal,
}

impl ThresholdOp {
    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOp::Above => value > threshold,
            ThresholdOp::Below => value < threshold,
            ThresholdOp::Equal => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// One rule condition, a tagged value variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleCondition {
    /// A named metric compared against a threshold
    MetricThreshold {
        metric: String,
        op: ThresholdOp,
        value: f64,
    },
    /// A status-change flag was raised this evaluation window
    StatusChange { key: String },
    /// A named pattern flag was raised
    Pattern { key: String },
    /// An anomaly of the given type is active
    Anomaly { anomaly_type: String },
    /// A metric moved by at least `min_delta` since the last pass
    RateOfChange { metric: String, min_delta: f64 },
    /// At least `min_matching` of the named metrics exceed `threshold`
    Correlation {
        metrics: Vec<String>,
        threshold: f64,
        min_matching: usize,
    },
}

/// How a rule combines its conditions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    And,
    Or,
}

/// Action taken when a rule fires
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleAction {
    Notify { channels: Vec<NotificationChannel> },
    Escalate,
    LogEvent,
    CreateTicket { queue: String },
    ExecuteScript { name: String },
}

/// Snapshot the rule evaluator works against
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub metrics: HashMap<String, f64>,
    /// Raised flags, prefixed by family: `status:`, `pattern:`, `anomaly:`
    pub flags: HashSet<String>,
}

/// Provider of evaluation snapshots, implemented by the engine
#[async_trait]
pub trait RuleContextProvider: Send + Sync {
    async fn evaluation_context(&self) -> EvaluationContext;
}

/// One alerting rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub conditions: Vec<RuleCondition>,
    pub condition_logic: ConditionLogic,
    pub actions: Vec<RuleAction>,
    /// Minimum time between firings, in seconds
    pub cooldown_secs: u64,
    /// Cap on firings inside `time_window_secs`
    pub max_frequency: u32,
    pub time_window_secs: u64,
    pub escalation_chain: Option<EscalationChain>,
    #[serde(skip)]
    pub last_fired: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub fired_times: VecDeque<DateTime<Utc>>,
}

impl AlertRule {
    pub fn new(name: &str, alert_type: AlertType, severity: Severity) -> Self {
        AlertRule {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            enabled: true,
            alert_type,
            severity,
            conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            actions: vec![RuleAction::LogEvent],
            cooldown_secs: 300,
            max_frequency: 10,
            time_window_secs: 3600,
            escalation_chain: None,
            last_fired: None,
            fired_times: VecDeque::new(),
        }
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: ConditionLogic) -> Self {
        self.condition_logic = logic;
        self
    }

    pub fn with_action(mut self, action: RuleAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Whether the conditions hold under the rule's logic
    pub fn conditions_hold(
        &self,
        context: &EvaluationContext,
        previous_metrics: &HashMap<String, f64>,
    ) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        let mut results = self
            .conditions
            .iter()
            .map(|c| Self::condition_holds(c, context, previous_metrics));
        match self.condition_logic {
            ConditionLogic::And => results.all(|r| r),
            ConditionLogic::Or => results.any(|r| r),
        }
    }

    fn condition_holds(
        condition: &RuleCondition,
        context: &EvaluationContext,
        previous_metrics: &HashMap<String, f64>,
    ) -> bool {
        match condition {
            RuleCondition::MetricThreshold { metric, op, value } => context
                .metrics
                .get(metric)
                .map(|v| op.holds(*v, *value))
                .unwrap_or(false),
            RuleCondition::StatusChange { key } => context.flags.contains(&format!("status:{key}")),
            RuleCondition::Pattern { key } => context.flags.contains(&format!("pattern:{key}")),
            RuleCondition::Anomaly { anomaly_type } => {
                context.flags.contains(&format!("anomaly:{anomaly_type}"))
            }
            RuleCondition::RateOfChange { metric, min_delta } => {
                match (context.metrics.get(metric), previous_metrics.get(metric)) {
                    (Some(now), Some(then)) => (now - then).abs() >= *min_delta,
                    _ => false,
                }
            }
            RuleCondition::Correlation {
                metrics,
                threshold,
                min_matching,
            } => {
                let matching = metrics
                    .iter()
                    .filter(|m| context.metrics.get(*m).map(|v| v >= threshold).unwrap_or(false))
                    .count();
                matching >= *min_matching
            }
        }
    }

    /// Whether cooldown and frequency limits allow firing at `now`
    pub fn may_fire(&self, now: DateTime<Utc>) -> bool {
        if let Some(last) = self.last_fired {
            if now - last < Duration::seconds(self.cooldown_secs as i64) {
                return false;
            }
        }
        let window_start = now - Duration::seconds(self.time_window_secs as i64);
        let recent = self.fired_times.iter().filter(|t| **t >= window_start).count();
        recent < self.max_frequency as usize
    }

    /// Record a firing
    pub fn record_fired(&mut self, now: DateTime<Utc>) {
        self.last_fired = Some(now);
        self.fired_times.push_back(now);
        let window_start = now - Duration::seconds(self.time_window_secs as i64);
        while matches!(self.fired_times.front(), Some(t) if *t < window_start) {
            self.fired_times.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(metrics: &[(&str, f64)], flags: &[&str]) -> EvaluationContext {
        EvaluationContext {
            metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn and_logic_requires_all_conditions() {
        let rule = AlertRule::new("latency+loss", AlertType::HighLatency, Severity::Warning)
            .with_condition(RuleCondition::MetricThreshold {
                metric: "latency_ms".to_string(),
                op: ThresholdOp::Above,
                value: 100.0,
            })
            .with_condition(RuleCondition::MetricThreshold {
                metric: "packet_loss".to_string(),
                op: ThresholdOp::Above,
                value: 0.05,
            });

        let previous = HashMap::new();
        assert!(rule.conditions_hold(
            &context(&[("latency_ms", 150.0), ("packet_loss", 0.1)], &[]),
            &previous
        ));
        assert!(!rule.conditions_hold(
            &context(&[("latency_ms", 150.0), ("packet_loss", 0.01)], &[]),
            &previous
        ));
    }

    #[test]
    fn or_logic_needs_any_condition() {
        let rule = AlertRule::new("either", AlertType::QualityDegraded, Severity::Warning)
            .with_logic(ConditionLogic::Or)
            .with_condition(RuleCondition::Pattern {
                key: "ping_pong".to_string(),
            })
            .with_condition(RuleCondition::MetricThreshold {
                metric: "quality".to_string(),
                op: ThresholdOp::Below,
                value: 0.3,
            });

        let previous = HashMap::new();
        assert!(rule.conditions_hold(&context(&[], &["pattern:ping_pong"]), &previous));
        assert!(rule.conditions_hold(&context(&[("quality", 0.2)], &[]), &previous));
        assert!(!rule.conditions_hold(&context(&[("quality", 0.9)], &[]), &previous));
    }

    #[test]
    fn rate_of_change_compares_to_previous_pass() {
        let rule = AlertRule::new("drop", AlertType::QualityDegraded, Severity::Warning)
            .with_condition(RuleCondition::RateOfChange {
                metric: "quality".to_string(),
                min_delta: 0.2,
            });

        let mut previous = HashMap::new();
        previous.insert("quality".to_string(), 0.9);
        assert!(rule.conditions_hold(&context(&[("quality", 0.6)], &[]), &previous));
        assert!(!rule.conditions_hold(&context(&[("quality", 0.85)], &[]), &previous));
    }

    #[test]
    fn correlation_counts_matching_metrics() {
        let rule = AlertRule::new("many-bad-aps", AlertType::QualityDegraded, Severity::Error)
            .with_condition(RuleCondition::Correlation {
                metrics: vec!["ap1_load".to_string(), "ap2_load".to_string(), "ap3_load".to_string()],
                threshold: 0.8,
                min_matching: 2,
            });

        let previous = HashMap::new();
        assert!(rule.conditions_hold(
            &context(&[("ap1_load", 0.9), ("ap2_load", 0.85), ("ap3_load", 0.1)], &[]),
            &previous
        ));
        assert!(!rule.conditions_hold(
            &context(&[("ap1_load", 0.9), ("ap2_load", 0.1), ("ap3_load", 0.1)], &[]),
            &previous
        ));
    }

    #[test]
    fn cooldown_and_frequency_gate_firing() {
        let mut rule = AlertRule::new("gated", AlertType::WeakSignal, Severity::Warning);
        rule.cooldown_secs = 60;
        rule.max_frequency = 2;
        rule.time_window_secs = 3600;

        let t0 = Utc::now();
        assert!(rule.may_fire(t0));
        rule.record_fired(t0);

        // Cooldown blocks an immediate refire.
        assert!(!rule.may_fire(t0 + Duration::seconds(30)));
        assert!(rule.may_fire(t0 + Duration::seconds(61)));
        rule.record_fired(t0 + Duration::seconds(61));

        // Frequency cap blocks the third firing within the window.
        assert!(!rule.may_fire(t0 + Duration::seconds(200)));
    }
}
