//! Weighted-rule roaming inference

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;
use wtm_common::utils::hour_and_weekday;
use wtm_common::{
    ApChangeCandidate, DeviceId, Mac, RoamGrade, RoamType, RoamTrigger, RoamingConfig,
    RoamingContext, RoamingEvent, SignalPoint,
};

/// What a matching rule does to the decision
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Infer,
    Reject,
}

/// One weighted condition inside a rule
///
/// Conditions are value types evaluated by a plain function; each
/// carries its own sub-weight toward the rule's match fraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RuleCondition {
    /// Signal improved by more than the delta
    SignalDeltaAbove { min_delta_db: i32, weight: f64 },
    /// Gap since the previous observation is below the bound
    TimeGapBelow { max_gap_ms: u64, weight: f64 },
    /// RSSI on the previous AP was below the threshold
    PriorSignalBelow { threshold_dbm: i32, weight: f64 },
    /// RSSI on the new AP is above the threshold
    CurrentSignalAbove { threshold_dbm: i32, weight: f64 },
    /// Target AP was used by this client within the window
    ReturningToRecentAp { within_ms: u64, weight: f64 },
}

impl RuleCondition {
    fn weight(&self) -> f64 {
        match self {
            RuleCondition::SignalDeltaAbove { weight, .. }
            | RuleCondition::TimeGapBelow { weight, .. }
            | RuleCondition::PriorSignalBelow { weight, .. }
            | RuleCondition::CurrentSignalAbove { weight, .. }
            | RuleCondition::ReturningToRecentAp { weight, .. } => *weight,
        }
    }

    fn holds(&self, candidate: &ApChangeCandidate, state: &ClientInferenceState) -> bool {
        match self {
            RuleCondition::SignalDeltaAbove { min_delta_db, .. } => {
                candidate.current_rssi - candidate.prior_rssi > *min_delta_db
            }
            RuleCondition::TimeGapBelow { max_gap_ms, .. } => {
                let gap = candidate.timestamp - state.last_update;
                gap < Duration::milliseconds(*max_gap_ms as i64)
            }
            RuleCondition::PriorSignalBelow { threshold_dbm, .. } => {
                candidate.prior_rssi < *threshold_dbm
            }
            RuleCondition::CurrentSignalAbove { threshold_dbm, .. } => {
                candidate.current_rssi > *threshold_dbm
            }
            RuleCondition::ReturningToRecentAp { within_ms, .. } => {
                let cutoff = candidate.timestamp - Duration::milliseconds(*within_ms as i64);
                state
                    .recent_aps
                    .iter()
                    .any(|(ap, last_used)| *ap == candidate.to_ap && *last_used >= cutoff)
            }
        }
    }
}

/// One weighted inference rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoamingRule {
    pub name: String,
    pub weight: f64,
    pub action: RuleAction,
    pub trigger: RoamTrigger,
    pub conditions: Vec<RuleCondition>,
}

impl RoamingRule {
    /// Weighted fraction of satisfied conditions; the rule matches at
    /// 0.5 or above and the fraction doubles as its confidence
    fn evaluate(&self, candidate: &ApChangeCandidate, state: &ClientInferenceState) -> f64 {
        let total: f64 = self.conditions.iter().map(RuleCondition::weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let satisfied: f64 = self
            .conditions
            .iter()
            .filter(|c| c.holds(candidate, state))
            .map(RuleCondition::weight)
            .sum();
        satisfied / total
    }
}

/// Outcome of evaluating one candidate
#[derive(Debug, Clone)]
pub enum InferenceDecision {
    /// A reject rule matched
    Rejected { rule: String },
    /// Aggregate confidence fell below the floor
    BelowConfidence { confidence: f64 },
    Confirmed(RoamingEvent),
}

/// Raw AP transition, kept whether or not it was confirmed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_ap: DeviceId,
    pub to_ap: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub accepted: bool,
}

/// Per-client inference state
#[derive(Debug, Clone)]
struct ClientInferenceState {
    current_ap: DeviceId,
    current_ssid: String,
    last_rssi: i32,
    last_update: DateTime<Utc>,
    recent_aps: VecDeque<(DeviceId, DateTime<Utc>)>,
    signal_ring: VecDeque<SignalPoint>,
    transitions: VecDeque<TransitionRecord>,
}

impl ClientInferenceState {
    fn new(candidate: &ApChangeCandidate) -> Self {
        ClientInferenceState {
            current_ap: candidate.from_ap.clone(),
            current_ssid: candidate.from_ssid.clone(),
            last_rssi: candidate.prior_rssi,
            last_update: candidate.connected_since,
            recent_aps: VecDeque::new(),
            signal_ring: VecDeque::new(),
            transitions: VecDeque::new(),
        }
    }
}

/// Roaming inference engine
pub struct InferenceEngine {
    config: RoamingConfig,
    rules: RwLock<Vec<RoamingRule>>,
    state: RwLock<HashMap<Mac, ClientInferenceState>>,
    evaluated: AtomicU64,
    confirmed: AtomicU64,
    rejected: AtomicU64,
    below_confidence: AtomicU64,
}

impl InferenceEngine {
    pub fn new(config: RoamingConfig) -> Self {
        let rules = Self::default_rules(&config);
        InferenceEngine {
            config,
            rules: RwLock::new(rules),
            state: RwLock::new(HashMap::new()),
            evaluated: AtomicU64::new(0),
            confirmed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            below_confidence: AtomicU64::new(0),
        }
    }

    fn default_rules(config: &RoamingConfig) -> Vec<RoamingRule> {
        vec![
            RoamingRule {
                name: "ping_pong_rejector".to_string(),
                weight: 0.9,
                action: RuleAction::Reject,
                trigger: RoamTrigger::Unknown,
                conditions: vec![
                    RuleCondition::TimeGapBelow {
                        max_gap_ms: config.min_roaming_gap_ms,
                        weight: 0.5,
                    },
                    RuleCondition::ReturningToRecentAp {
                        within_ms: config.min_roaming_gap_ms * 3,
                        weight: 0.5,
                    },
                ],
            },
            RoamingRule {
                name: "signal_driven".to_string(),
                weight: 0.8,
                action: RuleAction::Infer,
                trigger: RoamTrigger::BetterSignal,
                conditions: vec![
                    RuleCondition::SignalDeltaAbove {
                        min_delta_db: config.signal_delta_threshold_db,
                        weight: 0.6,
                    },
                    RuleCondition::TimeGapBelow {
                        max_gap_ms: config.max_roaming_gap_ms,
                        weight: 0.4,
                    },
                ],
            },
            RoamingRule {
                name: "weak_signal_escape".to_string(),
                weight: 0.7,
                action: RuleAction::Infer,
                trigger: RoamTrigger::WeakSignal,
                conditions: vec![
                    RuleCondition::PriorSignalBelow {
                        threshold_dbm: config.weak_signal_threshold_dbm,
                        weight: 0.5,
                    },
                    RuleCondition::CurrentSignalAbove {
                        threshold_dbm: config.weak_signal_threshold_dbm,
                        weight: 0.5,
                    },
                ],
            },
        ]
    }

    /// Register an additional rule
    pub async fn add_rule(&self, rule: RoamingRule) {
        self.rules.write().await.push(rule);
    }

    /// Evaluate one AP-change candidate against the ruleset
    ///
    /// The per-client state is updated regardless of the decision so
    /// later candidates see the transition.
    pub async fn evaluate(
        &self,
        candidate: &ApChangeCandidate,
        network_load: f64,
        client_count: usize,
    ) -> InferenceDecision {
        self.evaluated.fetch_add(1, Ordering::Relaxed);

        let decision = {
            let state_map = self.state.read().await;
            let state = state_map.get(&candidate.client_mac);
            self.decide(candidate, state, network_load, client_count).await
        };

        self.apply_transition(candidate, matches!(decision, InferenceDecision::Confirmed(_)))
            .await;

        match &decision {
            InferenceDecision::Rejected { rule } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(mac = %candidate.client_mac, rule = %rule, "Candidate rejected");
            }
            InferenceDecision::BelowConfidence { confidence } => {
                self.below_confidence.fetch_add(1, Ordering::Relaxed);
                debug!(
                    mac = %candidate.client_mac,
                    confidence,
                    "Candidate below confidence floor"
                );
            }
            InferenceDecision::Confirmed(event) => {
                self.confirmed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    mac = %candidate.client_mac,
                    from = %event.from_ap,
                    to = %event.to_ap,
                    confidence = event.confidence,
                    "Roaming confirmed"
                );
            }
        }
        decision
    }

    async fn decide(
        &self,
        candidate: &ApChangeCandidate,
        state: Option<&ClientInferenceState>,
        network_load: f64,
        client_count: usize,
    ) -> InferenceDecision {
        // A first-ever candidate has no prior state; treat the
        // observation itself as the prior.
        let fallback = ClientInferenceState::new(candidate);
        let state = state.unwrap_or(&fallback);

        let rules = self.rules.read().await;
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for rule in rules.iter() {
            let fraction = rule.evaluate(candidate, state);
            if fraction < 0.5 {
                continue;
            }
            if rule.action == RuleAction::Reject {
                return InferenceDecision::Rejected {
                    rule: rule.name.clone(),
                };
            }
            weighted_sum += rule.weight * fraction;
            weight_total += rule.weight;
        }

        let confidence = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };
        if confidence < self.config.min_confidence_threshold {
            return InferenceDecision::BelowConfidence { confidence };
        }

        let (hour_of_day, weekday) = hour_and_weekday(candidate.timestamp);
        let duration_ms = (candidate.timestamp - candidate.connected_since).num_milliseconds();
        InferenceDecision::Confirmed(RoamingEvent {
            id: Uuid::new_v4().to_string(),
            client_mac: candidate.client_mac.clone(),
            from_ap: candidate.from_ap.clone(),
            to_ap: candidate.to_ap.clone(),
            from_ssid: candidate.from_ssid.clone(),
            to_ssid: candidate.to_ssid.clone(),
            timestamp: candidate.timestamp,
            duration_ms,
            signal_before: candidate.prior_rssi,
            signal_after: candidate.current_rssi,
            // Classified downstream by the detector
            roam_type: RoamType::Unknown,
            trigger: RoamTrigger::Unknown,
            confidence,
            grade: RoamGrade::Fair,
            anomalous: false,
            context: RoamingContext {
                network_load,
                hour_of_day,
                weekday,
                client_count,
            },
        })
    }

    /// Record the transition into per-client state
    async fn apply_transition(&self, candidate: &ApChangeCandidate, accepted: bool) {
        let mut state_map = self.state.write().await;
        let state = state_map
            .entry(candidate.client_mac.clone())
            .or_insert_with(|| ClientInferenceState::new(candidate));

        if state.recent_aps.len() >= self.config.max_signal_samples {
            state.recent_aps.pop_front();
        }
        state
            .recent_aps
            .push_back((state.current_ap.clone(), candidate.timestamp));

        if state.transitions.len() >= self.config.max_events_per_client {
            state.transitions.pop_front();
        }
        state.transitions.push_back(TransitionRecord {
            from_ap: candidate.from_ap.clone(),
            to_ap: candidate.to_ap.clone(),
            timestamp: candidate.timestamp,
            accepted,
        });

        if state.signal_ring.len() >= self.config.max_signal_samples {
            state.signal_ring.pop_front();
        }
        state.signal_ring.push_back(SignalPoint {
            timestamp: candidate.timestamp,
            rssi: candidate.current_rssi,
            noise_floor: None,
            tx_rate: None,
            rx_rate: None,
            ap_id: candidate.to_ap.clone(),
            quality: SignalPoint::quality_for_rssi(candidate.current_rssi),
        });

        state.current_ap = candidate.to_ap.clone();
        state.current_ssid = candidate.to_ssid.clone();
        state.last_rssi = candidate.current_rssi;
        state.last_update = candidate.timestamp;
    }

    /// Raw transitions for a client, oldest first
    pub async fn transitions(&self, mac: &str) -> Vec<TransitionRecord> {
        self.state
            .read()
            .await
            .get(mac)
            .map(|s| s.transitions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// (evaluated, confirmed, rejected, below-confidence) counters
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.evaluated.load(Ordering::Relaxed),
            self.confirmed.load(Ordering::Relaxed),
            self.rejected.load(Ordering::Relaxed),
            self.below_confidence.load(Ordering::Relaxed),
        )
    }
}
