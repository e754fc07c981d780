//! Classification of confirmed roaming events

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info};
use wtm_common::{
    DeviceId, Error, Mac, Result, RoamGrade, RoamType, RoamTrigger, RoamingConfig, RoamingEvent,
};

const SIGNAL_TREND_SAMPLES: usize = 10;
const CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Kinds of per-client roaming anomaly flags
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyFlagKind {
    ExcessiveRoaming,
    PingPong,
    SignalAnomaly,
}

/// Lightweight anomaly marker kept on the roaming state
///
/// Full case management happens in the anomaly detector; these flags
/// record what the classifier saw inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub kind: AnomalyFlagKind,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Per-client roaming state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRoamingState {
    pub current_ap: DeviceId,
    pub previous_ap: DeviceId,
    /// Roam timestamps inside the trailing hour
    pub roam_times: VecDeque<DateTime<Utc>>,
    /// Post-roam RSSI trend, last ten samples
    pub signal_trend: VecDeque<i32>,
    pub events: VecDeque<RoamingEvent>,
    pub flags: HashMap<AnomalyFlagKind, AnomalyFlag>,
    /// 1 / (1 + variance/100) over the signal trend
    pub stability: f64,
}

impl ClientRoamingState {
    /// Roams observed in the trailing hour ending at `now`
    pub fn frequency_per_hour(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = now - Duration::hours(1);
        self.roam_times.iter().filter(|t| **t >= cutoff).count() as u32
    }

    fn trend_variance(&self) -> f64 {
        if self.signal_trend.len() < 2 {
            return 0.0;
        }
        let mean = self.signal_trend.iter().map(|v| *v as f64).sum::<f64>()
            / self.signal_trend.len() as f64;
        self.signal_trend
            .iter()
            .map(|v| (*v as f64 - mean).powi(2))
            .sum::<f64>()
            / self.signal_trend.len() as f64
    }
}

/// Detector counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct RoamingStats {
    pub clients_tracked: usize,
    pub events_classified: u64,
    pub anomalous_events: u64,
}

/// Roaming detector component
pub struct RoamingDetector {
    config: RoamingConfig,
    state: Arc<RwLock<HashMap<Mac, ClientRoamingState>>>,
    events_classified: AtomicU64,
    anomalous_events: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RoamingDetector {
    pub fn new(config: RoamingConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(RoamingDetector {
            config,
            state: Arc::new(RwLock::new(HashMap::new())),
            events_classified: AtomicU64::new(0),
            anomalous_events: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Launch the history retention sweeper
    pub async fn start(self: &Arc<Self>, retention_secs: u64) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("roaming detector already running".to_string()));
        }
        info!("Starting roaming detector");

        let detector = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(std::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        detector
                            .prune_history(Utc::now() - Duration::seconds(retention_secs as i64))
                            .await;
                    }
                }
            }
        }));
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("roaming detector not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Roaming detector stopped");
        Ok(())
    }

    /// Classify a confirmed event and fold it into per-client state
    pub async fn classify(&self, mut event: RoamingEvent) -> RoamingEvent {
        let mut state_map = self.state.write().await;
        let state = state_map.entry(event.client_mac.clone()).or_default();
        if state.current_ap.is_empty() {
            state.current_ap = event.from_ap.clone();
        }

        event.roam_type = self.classify_type(&event);
        event.trigger = self.classify_trigger(&event);
        event.grade = RoamGrade::from_score(self.quality_score(&event));

        let anomalous = self.flag_anomalies(state, &event);
        event.anomalous = anomalous;

        // Roll the state forward.
        if state.roam_times.len() >= self.config.max_events_per_client {
            state.roam_times.pop_front();
        }
        state.roam_times.push_back(event.timestamp);
        let hour_ago = event.timestamp - Duration::hours(1);
        while matches!(state.roam_times.front(), Some(t) if *t < hour_ago) {
            state.roam_times.pop_front();
        }

        if state.signal_trend.len() >= SIGNAL_TREND_SAMPLES {
            state.signal_trend.pop_front();
        }
        state.signal_trend.push_back(event.signal_after);
        state.stability = 1.0 / (1.0 + state.trend_variance() / 100.0);

        state.previous_ap = std::mem::replace(&mut state.current_ap, event.to_ap.clone());

        if state.events.len() >= self.config.max_events_per_client {
            state.events.pop_front();
        }
        state.events.push_back(event.clone());

        self.events_classified.fetch_add(1, Ordering::Relaxed);
        if anomalous {
            self.anomalous_events.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            mac = %event.client_mac,
            roam_type = ?event.roam_type,
            trigger = ?event.trigger,
            grade = ?event.grade,
            anomalous,
            "Classified roaming event"
        );
        event
    }

    fn classify_type(&self, event: &RoamingEvent) -> RoamType {
        let delta = event.signal_after - event.signal_before;
        if delta > 10 || event.signal_before < self.config.weak_signal_threshold_dbm {
            RoamType::SignalDriven
        } else if event.duration_ms < 30_000 {
            RoamType::LoadBalancing
        } else {
            RoamType::Unknown
        }
    }

    fn classify_trigger(&self, event: &RoamingEvent) -> RoamTrigger {
        let delta = event.signal_after - event.signal_before;
        if event.signal_before < self.config.weak_signal_threshold_dbm {
            RoamTrigger::WeakSignal
        } else if delta > 10 {
            RoamTrigger::BetterSignal
        } else if event.context.network_load > 0.8 {
            RoamTrigger::HighLoad
        } else {
            RoamTrigger::Unknown
        }
    }

    fn quality_score(&self, event: &RoamingEvent) -> f64 {
        let delta = event.signal_after - event.signal_before;
        let mut score: f64 = 0.5;
        if delta > 15 {
            score += 0.3;
        } else if delta > 5 {
            score += 0.1;
        }
        if delta < -10 {
            score -= 0.3;
        }
        // A hasty roam is only penalized when it bought no signal
        // improvement; a roam after a long stable association earns
        // the stability bonus.
        if event.duration_ms < 30_000 && delta <= 5 {
            score -= 0.2;
        } else if event.duration_ms > 300_000 {
            score += 0.2;
        }
        if event.signal_after > -60 {
            score += 0.1;
        } else if event.signal_after < self.config.weak_signal_threshold_dbm {
            score -= 0.2;
        }
        score.clamp(0.0, 1.0)
    }

    /// Raise or merge anomaly flags for this event
    fn flag_anomalies(&self, state: &mut ClientRoamingState, event: &RoamingEvent) -> bool {
        let mut any = false;

        let frequency = state.frequency_per_hour(event.timestamp) + 1;
        if frequency > self.config.excessive_roaming_per_hour {
            Self::merge_flag(state, AnomalyFlagKind::ExcessiveRoaming, event.timestamp);
            any = true;
        }

        let ping_pong_window = Duration::milliseconds(self.config.ping_pong_time_threshold_ms as i64);
        let last_roam = state.roam_times.back().copied();
        if state.previous_ap == event.to_ap
            && matches!(last_roam, Some(t) if event.timestamp - t < ping_pong_window)
        {
            Self::merge_flag(state, AnomalyFlagKind::PingPong, event.timestamp);
            any = true;
        }

        if event.signal_after < event.signal_before - 20 {
            Self::merge_flag(state, AnomalyFlagKind::SignalAnomaly, event.timestamp);
            any = true;
        }

        any
    }

    fn merge_flag(state: &mut ClientRoamingState, kind: AnomalyFlagKind, ts: DateTime<Utc>) {
        state
            .flags
            .entry(kind)
            .and_modify(|flag| {
                flag.count += 1;
                flag.last_seen = ts;
            })
            .or_insert(AnomalyFlag {
                kind,
                count: 1,
                first_seen: ts,
                last_seen: ts,
            });
    }

    /// Drop events and roam timestamps older than the cutoff
    pub async fn prune_history(&self, cutoff: DateTime<Utc>) {
        let mut state_map = self.state.write().await;
        for state in state_map.values_mut() {
            while matches!(state.events.front(), Some(e) if e.timestamp < cutoff) {
                state.events.pop_front();
            }
            while matches!(state.roam_times.front(), Some(t) if *t < cutoff) {
                state.roam_times.pop_front();
            }
        }
    }

    /// Deep copy of a client's roaming state
    pub async fn client_state(&self, mac: &str) -> Option<ClientRoamingState> {
        self.state.read().await.get(mac).cloned()
    }

    /// Confirmed events for a client, oldest first
    pub async fn roaming_events(&self, mac: &str) -> Vec<RoamingEvent> {
        self.state
            .read()
            .await
            .get(mac)
            .map(|s| s.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> RoamingStats {
        RoamingStats {
            clients_tracked: self.state.read().await.len(),
            events_classified: self.events_classified.load(Ordering::Relaxed),
            anomalous_events: self.anomalous_events.load(Ordering::Relaxed),
        }
    }
}
