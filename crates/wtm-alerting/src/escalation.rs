//! Alert escalation chains

use crate::notify::NotificationChannel;
use crate::rules::RuleAction;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One step in an escalation chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Delay after the previous step (or alert creation) in seconds
    pub delay_secs: u64,
    pub targets: Vec<NotificationChannel>,
    pub actions: Vec<RuleAction>,
}

/// Ordered list of escalation steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationChain {
    pub steps: Vec<EscalationStep>,
}

impl EscalationChain {
    pub fn new(steps: Vec<EscalationStep>) -> Self {
        EscalationChain { steps }
    }
}

/// Escalation state attached to one alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEscalation {
    pub alert_id: String,
    pub chain: EscalationChain,
    /// Steps already executed
    pub level: u32,
    pub next_escalation: Option<DateTime<Utc>>,
    pub completed: bool,
    pub resolved: bool,
}

impl AlertEscalation {
    /// Build escalation state for a fresh alert
    ///
    /// Returns `None` for an empty chain.
    pub fn for_alert(alert_id: &str, chain: EscalationChain, now: DateTime<Utc>) -> Option<Self> {
        let first = chain.steps.first()?;
        let next = now + Duration::seconds(first.delay_secs as i64);
        Some(AlertEscalation {
            alert_id: alert_id.to_string(),
            chain,
            level: 0,
            next_escalation: Some(next),
            completed: false,
            resolved: false,
        })
    }

    /// Whether this escalation should advance at `now`
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        !self.completed
            && !self.resolved
            && matches!(self.next_escalation, Some(next) if next <= now)
    }

    /// The step that would run next
    pub fn pending_step(&self) -> Option<&EscalationStep> {
        self.chain.steps.get(self.level as usize)
    }

    /// Advance past the step that just ran, scheduling the next one
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.level += 1;
        match self.chain.steps.get(self.level as usize) {
            Some(step) => {
                self.next_escalation = Some(now + Duration::seconds(step.delay_secs as i64));
            }
            None => {
                self.completed = true;
                self.next_escalation = None;
            }
        }
    }

    /// Stop escalating because the alert resolved
    pub fn mark_resolved(&mut self) {
        self.resolved = true;
        self.completed = true;
        self.next_escalation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_step_chain() -> EscalationChain {
        EscalationChain::new(vec![
            EscalationStep {
                delay_secs: 300,
                targets: vec![NotificationChannel::Log],
                actions: vec![],
            },
            EscalationStep {
                delay_secs: 900,
                targets: vec![NotificationChannel::Log],
                actions: vec![],
            },
        ])
    }

    #[test]
    fn schedule_walks_both_steps() {
        let t0 = Utc::now();
        let mut escalation = AlertEscalation::for_alert("alert-1", two_step_chain(), t0).unwrap();

        assert!(!escalation.due(t0 + Duration::seconds(299)));
        assert!(escalation.due(t0 + Duration::seconds(300)));

        let t1 = t0 + Duration::seconds(300);
        escalation.advance(t1);
        assert_eq!(escalation.level, 1);
        assert!(!escalation.completed);
        // Second step fires 15 minutes after the first ran.
        assert!(!escalation.due(t1 + Duration::seconds(899)));
        assert!(escalation.due(t1 + Duration::seconds(900)));

        escalation.advance(t1 + Duration::seconds(900));
        assert_eq!(escalation.level, 2);
        assert!(escalation.completed);
        assert!(escalation.next_escalation.is_none());
    }

    #[test]
    fn empty_chain_yields_no_escalation() {
        assert!(AlertEscalation::for_alert("alert-1", EscalationChain::default(), Utc::now()).is_none());
    }

    #[test]
    fn resolution_halts_escalation() {
        let t0 = Utc::now();
        let mut escalation = AlertEscalation::for_alert("alert-1", two_step_chain(), t0).unwrap();
        escalation.mark_resolved();
        assert!(escalation.completed);
        assert!(!escalation.due(t0 + Duration::hours(1)));
    }
}
