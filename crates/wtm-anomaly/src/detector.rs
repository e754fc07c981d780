//! Anomaly detection phases and case management

use crate::baseline::BaselineProfile;
use crate::case::{AnomalyCase, AnomalyStatus, Evidence};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::utils::{mean, std_dev};
use wtm_common::{
    AlertRequest, AlertSink, AnomalyConfig, AnomalySeverity, AnomalyType, BlobStore, DeviceId,
    Error, EventPriority, EventType, Mac, NetworkEvent, Result, RoamingEvent,
};

const STORE_NAMESPACE: &str = "anomalies";
const PING_PONG_SCAN_WINDOW_SECS: i64 = 300;

/// Session digest consumed by the detector
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub quality_score: f64,
    pub device_id: DeviceId,
    pub hour_of_day: u8,
}

/// Raw AP transition digest, confirmed or rejected
#[derive(Debug, Clone)]
pub struct TransitionSample {
    pub from_ap: DeviceId,
    pub to_ap: DeviceId,
    pub timestamp: DateTime<Utc>,
}

/// Provider of per-client session history and live signal quality
#[async_trait]
pub trait TelemetryProvider: Send + Sync {
    async fn clients(&self) -> Vec<Mac>;
    async fn session_summaries(&self, mac: &str) -> Vec<SessionSummary>;
    async fn current_signal_quality(&self, mac: &str) -> Option<f64>;
}

/// Provider of per-client roaming history
#[async_trait]
pub trait RoamingHistoryProvider: Send + Sync {
    async fn roaming_events(&self, mac: &str) -> Vec<RoamingEvent>;
    async fn transitions(&self, mac: &str) -> Vec<TransitionSample>;
    async fn frequency_last_hour(&self, mac: &str) -> u32;
}

/// Detector counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct AnomalyStats {
    pub baselines_learned: usize,
    pub active_cases: usize,
    pub resolved_cases: u64,
    pub cases_opened: u64,
    pub cases_merged: u64,
    pub detections_run: u64,
    pub alerts_forwarded: u64,
}

type CaseKey = (AnomalyType, Mac);

#[derive(Default)]
struct DetectorState {
    baselines: HashMap<Mac, BaselineProfile>,
    cases: HashMap<CaseKey, AnomalyCase>,
    archive: VecDeque<AnomalyCase>,
    /// (last session count, consecutive idle windows) per client
    idle_tracker: HashMap<Mac, (usize, u32)>,
}

/// One raised finding before case folding
struct Finding {
    anomaly_type: AnomalyType,
    severity: AnomalySeverity,
    evidence: Vec<Evidence>,
}

/// Anomaly detector component
pub struct AnomalyDetector {
    config: AnomalyConfig,
    telemetry: Arc<dyn TelemetryProvider>,
    roaming: Arc<dyn RoamingHistoryProvider>,
    alert_sink: Arc<dyn AlertSink>,
    state: Arc<RwLock<DetectorState>>,
    store: RwLock<Option<Arc<dyn BlobStore>>>,
    event_tx: RwLock<Option<mpsc::Sender<NetworkEvent>>>,
    detections_run: AtomicU64,
    cases_opened: AtomicU64,
    cases_merged: AtomicU64,
    cases_resolved: AtomicU64,
    alerts_forwarded: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AnomalyDetector {
    pub fn new(
        config: AnomalyConfig,
        telemetry: Arc<dyn TelemetryProvider>,
        roaming: Arc<dyn RoamingHistoryProvider>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(AnomalyDetector {
            config,
            telemetry,
            roaming,
            alert_sink,
            state: Arc::new(RwLock::new(DetectorState::default())),
            store: RwLock::new(None),
            event_tx: RwLock::new(None),
            detections_run: AtomicU64::new(0),
            cases_opened: AtomicU64::new(0),
            cases_merged: AtomicU64::new(0),
            cases_resolved: AtomicU64::new(0),
            alerts_forwarded: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Attach a blob store for best-effort case persistence
    pub async fn set_store(&self, store: Arc<dyn BlobStore>) {
        *self.store.write().await = Some(store);
    }

    /// Attach a sender for anomaly events
    pub async fn set_event_sender(&self, tx: mpsc::Sender<NetworkEvent>) {
        *self.event_tx.write().await = Some(tx);
    }

    /// Launch the periodic detection loop
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("anomaly detector already running".to_string()));
        }
        info!("Starting anomaly detector");

        let detector = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                interval(std::time::Duration::from_secs(detector.config.detection_interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => detector.run_detection_once().await,
                }
            }
        }));
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("anomaly detector not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Anomaly detector stopped");
        Ok(())
    }

    /// One detection pass over every known client
    pub async fn run_detection_once(&self) {
        self.detections_run.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();

        for mac in self.telemetry.clients().await {
            self.detect_for_client(&mac, now).await;
        }
    }

    async fn detect_for_client(&self, mac: &str, now: DateTime<Utc>) {
        let sessions = self.telemetry.session_summaries(mac).await;
        let roams = self.roaming.roaming_events(mac).await;

        // Learning gate: no baseline, no detection for this client.
        let baseline = match self.ensure_baseline(mac, &sessions, &roams, now).await {
            Some(baseline) => baseline,
            None => {
                debug!(mac = %mac, "Baseline not learned yet, skipping detection");
                return;
            }
        };

        let mut findings = Vec::new();
        self.statistical_phase(mac, &baseline, &mut findings).await;
        self.pattern_phase(mac, &baseline, &sessions, now, &mut findings).await;
        self.feature_phase(&roams, &mut findings);
        self.stuck_client_phase(mac, sessions.len(), &mut findings).await;

        for finding in findings {
            self.fold_finding(mac, finding, now).await;
        }
    }

    async fn ensure_baseline(
        &self,
        mac: &str,
        sessions: &[SessionSummary],
        roams: &[RoamingEvent],
        now: DateTime<Utc>,
    ) -> Option<BaselineProfile> {
        {
            let state = self.state.read().await;
            if let Some(baseline) = state.baselines.get(mac) {
                return Some(baseline.clone());
            }
        }
        let learned = BaselineProfile::learn(mac, sessions, roams, &self.config, now)?;
        info!(mac = %mac, samples = learned.sample_size, "Baseline learned");
        let mut state = self.state.write().await;
        state.baselines.insert(mac.to_string(), learned.clone());
        Some(learned)
    }

    /// Phase 1: roaming frequency and signal quality against baseline
    async fn statistical_phase(
        &self,
        mac: &str,
        baseline: &BaselineProfile,
        findings: &mut Vec<Finding>,
    ) {
        let frequency = self.roaming.frequency_last_hour(mac).await as f64;
        let deviation =
            BaselineProfile::deviation(frequency, baseline.roam_freq_mean, baseline.roam_freq_std);
        if frequency > baseline.roam_freq_threshold() {
            findings.push(Finding {
                anomaly_type: AnomalyType::ExcessiveRoaming,
                severity: AnomalySeverity::from_deviation(deviation),
                evidence: vec![Evidence {
                    kind: "roaming_frequency".to_string(),
                    value: frequency,
                    baseline: baseline.roam_freq_mean,
                    deviation,
                    description: format!(
                        "{frequency:.0} roams in the last hour against a norm of {:.1}",
                        baseline.roam_freq_mean
                    ),
                    confidence: (deviation.abs() / 4.0).min(1.0),
                }],
            });
        }

        if let Some(quality) = self.telemetry.current_signal_quality(mac).await {
            let deviation = BaselineProfile::deviation(
                quality,
                baseline.signal_quality_mean,
                baseline.signal_quality_std,
            );
            if quality < baseline.signal_threshold() {
                findings.push(Finding {
                    anomaly_type: AnomalyType::SignalAnomaly,
                    severity: AnomalySeverity::from_deviation(deviation),
                    evidence: vec![Evidence {
                        kind: "signal_quality".to_string(),
                        value: quality,
                        baseline: baseline.signal_quality_mean,
                        deviation,
                        description: format!(
                            "signal quality {quality:.2} against a norm of {:.2}",
                            baseline.signal_quality_mean
                        ),
                        confidence: (deviation.abs() / 4.0).min(1.0),
                    }],
                });
            }
        }
    }

    /// Phase 2: ping-pong sequences and time-window deviation
    async fn pattern_phase(
        &self,
        mac: &str,
        baseline: &BaselineProfile,
        sessions: &[SessionSummary],
        now: DateTime<Utc>,
        findings: &mut Vec<Finding>,
    ) {
        let transitions = self.roaming.transitions(mac).await;
        let instances = Self::count_ping_pong(&transitions);
        if instances > 0 {
            findings.push(Finding {
                anomaly_type: AnomalyType::PingPong,
                severity: AnomalySeverity::High,
                evidence: vec![Evidence {
                    kind: "ping_pong_sequence".to_string(),
                    value: instances as f64,
                    baseline: 0.0,
                    deviation: instances as f64,
                    description: format!("{instances} A-B-A-B oscillations within five minutes"),
                    confidence: 0.9,
                }],
            });
        }

        if !baseline.preferred_time_windows.is_empty() {
            let day_ago = now - Duration::hours(24);
            let recent: Vec<&SessionSummary> =
                sessions.iter().filter(|s| s.started_at >= day_ago).collect();
            if !recent.is_empty() {
                let outside = recent
                    .iter()
                    .filter(|s| !baseline.preferred_time_windows.contains(&s.hour_of_day))
                    .count();
                let share = outside as f64 / recent.len() as f64;
                if share > self.config.pattern_deviation_threshold {
                    findings.push(Finding {
                        anomaly_type: AnomalyType::TimeAnomaly,
                        severity: AnomalySeverity::Medium,
                        evidence: vec![Evidence {
                            kind: "time_window_deviation".to_string(),
                            value: share,
                            baseline: self.config.pattern_deviation_threshold,
                            deviation: share - self.config.pattern_deviation_threshold,
                            description: format!(
                                "{:.0}% of recent sessions fall outside the usual hours",
                                share * 100.0
                            ),
                            confidence: share.min(1.0),
                        }],
                    });
                }
            }
        }
    }

    /// Count A→B→A→B oscillations inside the scan window
    fn count_ping_pong(transitions: &[TransitionSample]) -> usize {
        let mut instances = 0;
        for window in transitions.windows(3) {
            let [first, second, third] = window else { continue };
            let alternates = first.from_ap == second.to_ap
                && first.to_ap == second.from_ap
                && second.from_ap == third.to_ap
                && second.to_ap == third.from_ap;
            if alternates
                && third.timestamp - first.timestamp <= Duration::seconds(PING_PONG_SCAN_WINDOW_SECS)
            {
                instances += 1;
            }
        }
        instances
    }

    /// Phase 3: feature-vector score over roaming history
    fn feature_phase(&self, roams: &[RoamingEvent], findings: &mut Vec<Finding>) {
        if roams.len() < 3 {
            return;
        }
        let features = Self::extract_features(roams);
        let score = Self::feature_score(&features);
        if score > self.config.anomaly_confidence_threshold {
            findings.push(Finding {
                anomaly_type: AnomalyType::UnusualPattern,
                severity: if score > 0.9 {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
                evidence: vec![Evidence {
                    kind: "feature_score".to_string(),
                    value: score,
                    baseline: self.config.anomaly_confidence_threshold,
                    deviation: score - self.config.anomaly_confidence_threshold,
                    description: format!("roaming feature score {score:.2}"),
                    confidence: score,
                }],
            });
        }
    }

    /// Ten-element roaming feature vector
    fn extract_features(roams: &[RoamingEvent]) -> [f64; 10] {
        let count = roams.len() as f64;
        let improvements: Vec<f64> = roams
            .iter()
            .map(|r| (r.signal_after - r.signal_before) as f64)
            .collect();
        let inter_event_secs: Vec<f64> = roams
            .windows(2)
            .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64)
            .collect();
        let unique_aps: HashSet<&str> = roams.iter().map(|r| r.to_ap.as_str()).collect();
        let anomalous = roams.iter().filter(|r| r.anomalous).count() as f64;
        let regressions = improvements.iter().filter(|v| **v < 0.0).count() as f64;

        [
            count,
            mean(&improvements),
            std_dev(&inter_event_secs),
            mean(&roams.iter().map(|r| r.duration_ms as f64).collect::<Vec<_>>()),
            unique_aps.len() as f64,
            anomalous / count,
            mean(&roams.iter().map(|r| r.confidence).collect::<Vec<_>>()),
            mean(&roams.iter().map(|r| r.context.network_load).collect::<Vec<_>>()),
            mean(&roams.iter().map(|r| r.context.hour_of_day as f64).collect::<Vec<_>>()),
            regressions / count,
        ]
    }

    /// Variance-based score proxy over squashed features, in [0, 1]
    fn feature_score(features: &[f64; 10]) -> f64 {
        let squashed: Vec<f64> = features.iter().map(|f| f.abs() / (1.0 + f.abs())).collect();
        (std_dev(&squashed) * 3.0).clamp(0.0, 1.0)
    }

    /// Stuck-client check: no session churn for consecutive windows
    /// while signal quality stays poor
    async fn stuck_client_phase(
        &self,
        mac: &str,
        session_count: usize,
        findings: &mut Vec<Finding>,
    ) {
        let idle_windows = {
            let mut state = self.state.write().await;
            let entry = state.idle_tracker.entry(mac.to_string()).or_insert((session_count, 0));
            if entry.0 == session_count {
                entry.1 += 1;
            } else {
                *entry = (session_count, 0);
            }
            entry.1
        };

        if idle_windows < self.config.stuck_client_windows {
            return;
        }
        let Some(quality) = self.telemetry.current_signal_quality(mac).await else {
            return;
        };
        if quality < 0.3 {
            findings.push(Finding {
                anomaly_type: AnomalyType::StuckClient,
                severity: AnomalySeverity::Medium,
                evidence: vec![Evidence {
                    kind: "stuck_client".to_string(),
                    value: quality,
                    baseline: 0.3,
                    deviation: 0.3 - quality,
                    description: format!(
                        "no session transitions for {idle_windows} windows at quality {quality:.2}"
                    ),
                    confidence: 0.7,
                }],
            });
        }
    }

    /// Create or merge the case for a finding, forwarding outside the
    /// cooldown window
    async fn fold_finding(&self, mac: &str, finding: Finding, now: DateTime<Utc>) {
        let cooldown = Duration::seconds(self.config.cooldown_secs as i64);
        let key = (finding.anomaly_type, mac.to_string());

        let (case, forward) = {
            let mut state = self.state.write().await;
            let has_active_case =
                matches!(state.cases.get(&key), Some(c) if c.status == AnomalyStatus::Active);
            if has_active_case {
                let Some(existing) = state.cases.get_mut(&key) else {
                    return;
                };
                let outside_cooldown = now - existing.last_occurrence >= cooldown;
                existing.merge(finding.severity, finding.evidence, now);
                self.cases_merged.fetch_add(1, Ordering::Relaxed);
                (existing.clone(), outside_cooldown)
            } else {
                if let Some(stale) = state.cases.remove(&key) {
                    Self::archive_case(&mut state, stale, self.config.max_cases);
                }
                let case = AnomalyCase::new(
                    finding.anomaly_type,
                    mac,
                    finding.severity,
                    finding.evidence,
                    now,
                );
                self.cases_opened.fetch_add(1, Ordering::Relaxed);
                state.cases.insert(key.clone(), case.clone());
                (case, true)
            }
        };

        self.persist_case(&case).await;
        if !forward {
            return;
        }

        let request = AlertRequest::new(
            case.anomaly_type.alert_type(),
            case.severity.alert_severity(),
            "",
            mac,
            &format!("Anomaly: {}", case.anomaly_type.as_str()),
            &case.impact,
        );
        match self.alert_sink.raise_alert(request).await {
            Ok(_) => {
                self.alerts_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::Suppressed(_)) => {}
            Err(e) => warn!("Anomaly alert forwarding failed: {}", e),
        }

        if let Some(tx) = self.event_tx.read().await.as_ref() {
            let event = NetworkEvent::new(EventType::AnomalyDetected, "anomaly-detector", "")
                .with_priority(match case.severity {
                    AnomalySeverity::Critical => EventPriority::Critical,
                    AnomalySeverity::High => EventPriority::High,
                    _ => EventPriority::Normal,
                })
                .with_reason(case.anomaly_type.as_str())
                .with_metadata("mac", serde_json::Value::String(mac.to_string()))
                .with_metadata("case_id", serde_json::Value::String(case.id.clone()));
            let _ = tx.try_send(event);
        }
    }

    fn archive_case(state: &mut DetectorState, case: AnomalyCase, cap: usize) {
        if state.archive.len() >= cap {
            state.archive.pop_front();
        }
        state.archive.push_back(case);
    }

    /// Mark a case resolved by an external actor
    pub async fn resolve_case(&self, case_id: &str, actor: &str, reason: &str) -> Result<AnomalyCase> {
        let mut state = self.state.write().await;
        let key = state
            .cases
            .iter()
            .find(|(_, case)| case.id == case_id)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| Error::NotFound(format!("anomaly case {case_id}")))?;

        let Some(case) = state.cases.get_mut(&key) else {
            return Err(Error::NotFound(format!("anomaly case {case_id}")));
        };
        case.resolve(actor, reason, Utc::now());
        let resolved = case.clone();
        let removed = state.cases.remove(&key);
        if let Some(case) = removed {
            Self::archive_case(&mut state, case, self.config.max_cases);
        }
        self.cases_resolved.fetch_add(1, Ordering::Relaxed);
        drop(state);

        self.persist_case(&resolved).await;
        Ok(resolved)
    }

    /// Deep copy of all active cases
    pub async fn active_cases(&self) -> Vec<AnomalyCase> {
        self.state.read().await.cases.values().cloned().collect()
    }

    /// Deep copy of one client's baseline, if learned
    pub async fn baseline(&self, mac: &str) -> Option<BaselineProfile> {
        self.state.read().await.baselines.get(mac).cloned()
    }

    pub async fn stats(&self) -> AnomalyStats {
        let state = self.state.read().await;
        AnomalyStats {
            baselines_learned: state.baselines.len(),
            active_cases: state.cases.len(),
            resolved_cases: self.cases_resolved.load(Ordering::Relaxed),
            cases_opened: self.cases_opened.load(Ordering::Relaxed),
            cases_merged: self.cases_merged.load(Ordering::Relaxed),
            detections_run: self.detections_run.load(Ordering::Relaxed),
            alerts_forwarded: self.alerts_forwarded.load(Ordering::Relaxed),
        }
    }

    async fn persist_case(&self, case: &AnomalyCase) {
        let Some(store) = self.store.read().await.clone() else {
            return;
        };
        let key = case.id.clone();
        match serde_json::to_vec(case) {
            Ok(blob) => {
                tokio::spawn(async move {
                    if let Err(e) = store.put(STORE_NAMESPACE, &key, blob).await {
                        warn!("Best-effort anomaly persistence failed: {}", e);
                    }
                });
            }
            Err(e) => warn!("Anomaly case serialization failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use wtm_common::{RoamGrade, RoamType, RoamTrigger, RoamingContext};

    const MAC: &str = "aa:bb:cc:dd:ee:01";

    #[derive(Default)]
    struct FakeTelemetry {
        sessions: Vec<SessionSummary>,
        signal_quality: Option<f64>,
    }

    #[async_trait]
    impl TelemetryProvider for FakeTelemetry {
        async fn clients(&self) -> Vec<Mac> {
            vec![MAC.to_string()]
        }
        async fn session_summaries(&self, _mac: &str) -> Vec<SessionSummary> {
            self.sessions.clone()
        }
        async fn current_signal_quality(&self, _mac: &str) -> Option<f64> {
            self.signal_quality
        }
    }

    #[derive(Default)]
    struct FakeRoaming {
        events: Vec<RoamingEvent>,
        transitions: Vec<TransitionSample>,
        frequency: u32,
    }

    #[async_trait]
    impl RoamingHistoryProvider for FakeRoaming {
        async fn roaming_events(&self, _mac: &str) -> Vec<RoamingEvent> {
            self.events.clone()
        }
        async fn transitions(&self, _mac: &str) -> Vec<TransitionSample> {
            self.transitions.clone()
        }
        async fn frequency_last_hour(&self, _mac: &str) -> u32 {
            self.frequency
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        requests: StdMutex<Vec<AlertRequest>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn raise_alert(&self, request: AlertRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request);
            Ok("alert-1".to_string())
        }
    }

    fn sessions(count: usize) -> Vec<SessionSummary> {
        (0..count)
            .map(|i| SessionSummary {
                started_at: Utc::now() - Duration::hours(i as i64 + 1),
                duration_ms: 600_000,
                quality_score: 0.8,
                device_id: "ap-1".to_string(),
                hour_of_day: 10,
            })
            .collect()
    }

    fn transition(from: &str, to: &str, secs: i64) -> TransitionSample {
        TransitionSample {
            from_ap: from.to_string(),
            to_ap: to.to_string(),
            timestamp: Utc::now() + Duration::seconds(secs),
        }
    }

    fn config() -> AnomalyConfig {
        AnomalyConfig {
            min_samples_for_baseline: 3,
            ..AnomalyConfig::default()
        }
    }

    fn detector(
        telemetry: FakeTelemetry,
        roaming: FakeRoaming,
        sink: Arc<RecordingSink>,
        config: AnomalyConfig,
    ) -> Arc<AnomalyDetector> {
        AnomalyDetector::new(config, Arc::new(telemetry), Arc::new(roaming), sink)
    }

    #[tokio::test]
    async fn no_baseline_means_no_detection() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = FakeTelemetry {
            sessions: sessions(1),
            signal_quality: Some(0.05),
        };
        let roaming = FakeRoaming {
            frequency: 50,
            ..FakeRoaming::default()
        };
        let detector = detector(telemetry, roaming, sink.clone(), config());
        detector.run_detection_once().await;

        assert!(detector.active_cases().await.is_empty());
        assert!(sink.requests.lock().unwrap().is_empty());
        assert_eq!(detector.stats().await.baselines_learned, 0);
    }

    #[tokio::test]
    async fn excessive_roaming_raises_case_with_evidence() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = FakeTelemetry {
            sessions: sessions(5),
            signal_quality: Some(0.8),
        };
        let roaming = FakeRoaming {
            frequency: 40,
            ..FakeRoaming::default()
        };
        let detector = detector(telemetry, roaming, sink.clone(), config());
        detector.run_detection_once().await;

        let cases = detector.active_cases().await;
        assert_eq!(cases.len(), 1);
        let case = &cases[0];
        assert_eq!(case.anomaly_type, AnomalyType::ExcessiveRoaming);
        assert!(!case.evidence.is_empty());
        assert_eq!(case.evidence[0].kind, "roaming_frequency");
        assert_eq!(sink.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn redetection_within_cooldown_merges() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = FakeTelemetry {
            sessions: sessions(5),
            signal_quality: Some(0.8),
        };
        let roaming = FakeRoaming {
            frequency: 40,
            ..FakeRoaming::default()
        };
        let detector = detector(telemetry, roaming, sink.clone(), config());
        detector.run_detection_once().await;
        detector.run_detection_once().await;

        let cases = detector.active_cases().await;
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].occurrence_count, 2);
        // Second detection merged inside the cooldown, no second alert.
        assert_eq!(sink.requests.lock().unwrap().len(), 1);
        assert_eq!(detector.stats().await.cases_merged, 1);
    }

    #[tokio::test]
    async fn ping_pong_sequence_is_detected() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = FakeTelemetry {
            sessions: sessions(5),
            signal_quality: Some(0.8),
        };
        let roaming = FakeRoaming {
            transitions: vec![
                transition("ap-1", "ap-2", 0),
                transition("ap-2", "ap-1", 30),
                transition("ap-1", "ap-2", 60),
            ],
            ..FakeRoaming::default()
        };
        let detector = detector(telemetry, roaming, sink, config());
        detector.run_detection_once().await;

        let cases = detector.active_cases().await;
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].anomaly_type, AnomalyType::PingPong);
        assert_eq!(cases[0].severity, AnomalySeverity::High);
        assert!(cases[0].occurrence_count >= 1);
    }

    #[tokio::test]
    async fn slow_alternation_is_not_ping_pong() {
        let transitions = vec![
            transition("ap-1", "ap-2", 0),
            transition("ap-2", "ap-1", 400),
            transition("ap-1", "ap-2", 800),
        ];
        assert_eq!(AnomalyDetector::count_ping_pong(&transitions), 0);
    }

    #[tokio::test]
    async fn resolve_moves_case_out_of_active() {
        let sink = Arc::new(RecordingSink::default());
        let telemetry = FakeTelemetry {
            sessions: sessions(5),
            signal_quality: Some(0.8),
        };
        let roaming = FakeRoaming {
            frequency: 40,
            ..FakeRoaming::default()
        };
        let detector = detector(telemetry, roaming, sink, config());
        detector.run_detection_once().await;

        let case_id = detector.active_cases().await[0].id.clone();
        let resolved = detector
            .resolve_case(&case_id, "operator", "coverage fixed")
            .await
            .unwrap();
        assert_eq!(resolved.status, AnomalyStatus::Resolved);
        assert!(detector.active_cases().await.is_empty());
        assert_eq!(detector.stats().await.resolved_cases, 1);

        let missing = detector.resolve_case("nope", "operator", "x").await;
        assert!(missing.is_err());
    }
}
