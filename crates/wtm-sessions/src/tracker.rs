//! Session lifecycle tracking

use crate::session::{
    ClientProfile, ReliabilityReport, Session, SessionActivity,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::utils::normalize_mac;
use wtm_common::{BlobStore, DeviceId, DisconnectReason, Error, Mac, Result, SessionConfig};

const STORE_NAMESPACE: &str = "sessions";

type SessionKey = (Mac, DeviceId);

/// Tracker counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub tracked_clients: usize,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub timeouts: u64,
    pub processing_errors: u64,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<SessionKey, Session>,
    history: HashMap<Mac, VecDeque<Session>>,
    profiles: HashMap<Mac, ClientProfile>,
}

/// Connection history tracker component
pub struct ConnectionTracker {
    config: SessionConfig,
    state: Arc<RwLock<TrackerState>>,
    store: RwLock<Option<Arc<dyn BlobStore>>>,
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    timeouts: AtomicU64,
    processing_errors: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ConnectionTracker {
    pub fn new(config: SessionConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(ConnectionTracker {
            config,
            state: Arc::new(RwLock::new(TrackerState::default())),
            store: RwLock::new(None),
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            processing_errors: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Attach a blob store for best-effort session persistence
    pub async fn set_store(&self, store: Arc<dyn BlobStore>) {
        *self.store.write().await = Some(store);
    }

    /// Launch the session timeout sweeper
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("session tracker already running".to_string()));
        }
        info!("Starting connection tracker");

        let tracker = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker =
                interval(std::time::Duration::from_secs(tracker.config.processing_interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => tracker.timeout_sweep().await,
                }
            }
        }));
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("session tracker not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Connection tracker stopped");
        Ok(())
    }

    /// Record an observation of a (client, AP) association
    ///
    /// Opens a session for a new pair, advances the existing one
    /// otherwise.
    pub async fn track_connection(
        &self,
        mac: &str,
        device_id: &str,
        ssid: &str,
        interface: &str,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mac = self.checked_mac(mac)?;
        let key = (mac.clone(), device_id.to_string());
        let mut state = self.state.write().await;

        if let Some(session) = state.active.get_mut(&key) {
            session.advance(ts);
            return Ok(());
        }

        let known_clients = state
            .active
            .keys()
            .map(|(m, _)| m)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let session = Session::open(&mac, device_id, ssid, interface, ts, known_clients);
        debug!(session = %session.id, "Opened session");
        state.active.insert(key, session);
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the active session for a (client, AP) pair
    pub async fn track_disconnection(
        &self,
        mac: &str,
        device_id: &str,
        reason: DisconnectReason,
        ts: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let mac = self.checked_mac(mac)?;
        let key = (mac.clone(), device_id.to_string());

        let closed = {
            let mut state = self.state.write().await;
            let Some(mut session) = state.active.remove(&key) else {
                debug!(mac = %mac, device = device_id, "Disconnect for unknown session ignored");
                return Ok(None);
            };
            session.close(reason, ts, &self.config);
            self.sessions_closed.fetch_add(1, Ordering::Relaxed);

            let history = state.history.entry(mac.clone()).or_default();
            if history.len() >= self.config.max_sessions_per_client {
                history.pop_front();
            }
            history.push_back(session.clone());
            let snapshot = history.clone();

            let profile = state.profiles.entry(mac.clone()).or_default();
            profile.recompute(&snapshot, &self.config);
            session
        };

        self.persist_session(&closed).await;
        Ok(Some(closed))
    }

    /// Append an activity to the active session of a pair
    pub async fn track_activity(
        &self,
        mac: &str,
        device_id: &str,
        kind: &str,
        duration_ms: u64,
        bytes: u64,
        ts: DateTime<Utc>,
    ) -> Result<()> {
        let mac = self.checked_mac(mac)?;
        let key = (mac, device_id.to_string());
        let mut state = self.state.write().await;
        let Some(session) = state.active.get_mut(&key) else {
            return Err(Error::Session(format!(
                "no active session for {} on {device_id}",
                key.0
            )));
        };
        session.push_activity(
            SessionActivity {
                kind: kind.to_string(),
                duration_ms,
                bytes,
                timestamp: ts,
            },
            self.config.max_activities_per_session,
        );
        session.advance(ts);
        Ok(())
    }

    /// Close sessions whose last observation is older than the timeout
    async fn timeout_sweep(&self) {
        let cutoff = Utc::now() - Duration::seconds(self.config.session_timeout_secs as i64);
        let expired: Vec<SessionKey> = {
            let state = self.state.read().await;
            state
                .active
                .iter()
                .filter(|(_, s)| s.last_update < cutoff)
                .map(|(k, _)| k.clone())
                .collect()
        };

        for (mac, device_id) in expired {
            let ts = Utc::now();
            match self
                .track_disconnection(&mac, &device_id, DisconnectReason::Timeout, ts)
                .await
            {
                Ok(Some(_)) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    debug!(mac = %mac, device = %device_id, "Session timed out");
                }
                Ok(None) => {}
                Err(e) => {
                    self.processing_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Timeout close failed: {}", e);
                }
            }
        }
    }

    /// Aggregate closed sessions of a pair over a trailing period
    pub async fn reliability_report(
        &self,
        mac: &str,
        device_id: &str,
        period: Duration,
    ) -> Result<ReliabilityReport> {
        let mac = self.checked_mac(mac)?;
        let period_end = Utc::now();
        let period_start = period_end - period;
        let min_ms = self.config.min_session_duration_secs as i64 * 1000;

        let state = self.state.read().await;
        let sessions: Vec<&Session> = state
            .history
            .get(&mac)
            .map(|h| {
                h.iter()
                    .filter(|s| s.device_id == device_id && s.started_at >= period_start)
                    .collect()
            })
            .unwrap_or_default();

        let mut report = ReliabilityReport {
            client_mac: mac,
            device_id: device_id.to_string(),
            period_start,
            period_end,
            session_count: sessions.len(),
            average_duration_ms: 0,
            average_quality: 0.0,
            success_rate: 0.0,
            disconnect_reasons: HashMap::new(),
        };
        if sessions.is_empty() {
            return Ok(report);
        }

        let mut successful = 0usize;
        for session in &sessions {
            report.average_duration_ms += session.duration_ms;
            report.average_quality += session.quality_score;
            if session.duration_ms >= min_ms {
                successful += 1;
            }
            if let Some(reason) = session.disconnect_reason {
                *report.disconnect_reasons.entry(reason).or_default() += 1;
            }
        }
        report.average_duration_ms /= sessions.len() as i64;
        report.average_quality /= sessions.len() as f64;
        report.success_rate = successful as f64 / sessions.len() as f64;
        Ok(report)
    }

    /// Deep copy of the active session for a pair
    pub async fn active_session(&self, mac: &str, device_id: &str) -> Option<Session> {
        let state = self.state.read().await;
        state
            .active
            .get(&(mac.to_string(), device_id.to_string()))
            .cloned()
    }

    /// Deep copy of a client's closed-session history, oldest first
    pub async fn client_history(&self, mac: &str) -> Vec<Session> {
        self.state
            .read()
            .await
            .history
            .get(mac)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deep copy of a client's behavioral profile
    pub async fn profile(&self, mac: &str) -> Option<ClientProfile> {
        self.state.read().await.profiles.get(mac).cloned()
    }

    pub async fn stats(&self) -> SessionStats {
        let state = self.state.read().await;
        SessionStats {
            active_sessions: state.active.len(),
            tracked_clients: state.history.len(),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
        }
    }

    fn checked_mac(&self, mac: &str) -> Result<Mac> {
        normalize_mac(mac).map_err(|e| {
            self.processing_errors.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    async fn persist_session(&self, session: &Session) {
        let Some(store) = self.store.read().await.clone() else {
            return;
        };
        let key = session.id.clone();
        match serde_json::to_vec(session) {
            Ok(blob) => {
                tokio::spawn(async move {
                    if let Err(e) = store.put(STORE_NAMESPACE, &key, blob).await {
                        warn!("Best-effort session persistence failed: {}", e);
                    }
                });
            }
            Err(e) => warn!("Session serialization failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: &str = "aa:bb:cc:dd:ee:01";

    #[tokio::test]
    async fn connect_then_disconnect_closes_with_exact_duration() {
        let tracker = ConnectionTracker::new(SessionConfig::default());
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(90);

        tracker.track_connection(MAC, "ap-1", "corp", "wlan0", t0).await.unwrap();
        assert_eq!(tracker.stats().await.active_sessions, 1);

        let closed = tracker
            .track_disconnection(MAC, "ap-1", DisconnectReason::Deauthenticated, t1)
            .await
            .unwrap()
            .expect("session should close");
        assert_eq!(closed.duration_ms, 90_000);
        assert_eq!(closed.disconnect_reason, Some(DisconnectReason::Deauthenticated));

        let stats = tracker.stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.sessions_closed, 1);
    }

    #[tokio::test]
    async fn reconnection_advances_instead_of_duplicating() {
        let tracker = ConnectionTracker::new(SessionConfig::default());
        let t0 = Utc::now();
        tracker.track_connection(MAC, "ap-1", "corp", "wlan0", t0).await.unwrap();
        tracker
            .track_connection(MAC, "ap-1", "corp", "wlan0", t0 + Duration::seconds(30))
            .await
            .unwrap();

        let stats = tracker.stats().await;
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.sessions_opened, 1);

        let session = tracker.active_session(MAC, "ap-1").await.unwrap();
        assert_eq!(session.last_update, t0 + Duration::seconds(30));
    }

    #[tokio::test]
    async fn history_is_bounded_fifo() {
        let config = SessionConfig {
            max_sessions_per_client: 3,
            ..SessionConfig::default()
        };
        let tracker = ConnectionTracker::new(config);
        let t0 = Utc::now();
        for i in 0..5 {
            let start = t0 + Duration::seconds(i * 100);
            tracker.track_connection(MAC, "ap-1", "corp", "wlan0", start).await.unwrap();
            tracker
                .track_disconnection(MAC, "ap-1", DisconnectReason::Roamed, start + Duration::seconds(10))
                .await
                .unwrap();
        }
        let history = tracker.client_history(MAC).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].started_at, t0 + Duration::seconds(200));
    }

    #[tokio::test]
    async fn activity_requires_active_session() {
        let tracker = ConnectionTracker::new(SessionConfig::default());
        let err = tracker
            .track_activity(MAC, "ap-1", "streaming", 1_000, 4096, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "session");
    }

    #[tokio::test]
    async fn per_pair_sessions_are_independent() {
        let tracker = ConnectionTracker::new(SessionConfig::default());
        let t0 = Utc::now();
        tracker.track_connection(MAC, "ap-1", "corp", "wlan0", t0).await.unwrap();
        tracker.track_connection(MAC, "ap-2", "corp", "wlan0", t0).await.unwrap();
        assert_eq!(tracker.stats().await.active_sessions, 2);

        tracker
            .track_disconnection(MAC, "ap-1", DisconnectReason::Roamed, t0 + Duration::seconds(5))
            .await
            .unwrap();
        assert!(tracker.active_session(MAC, "ap-1").await.is_none());
        assert!(tracker.active_session(MAC, "ap-2").await.is_some());
    }

    #[tokio::test]
    async fn reliability_report_aggregates_reasons() {
        let tracker = ConnectionTracker::new(SessionConfig::default());
        let t0 = Utc::now() - Duration::minutes(30);
        for (i, reason) in [DisconnectReason::Roamed, DisconnectReason::Timeout, DisconnectReason::Roamed]
            .iter()
            .enumerate()
        {
            let start = t0 + Duration::seconds(i as i64 * 120);
            tracker.track_connection(MAC, "ap-1", "corp", "wlan0", start).await.unwrap();
            tracker
                .track_disconnection(MAC, "ap-1", *reason, start + Duration::seconds(90))
                .await
                .unwrap();
        }

        let report = tracker
            .reliability_report(MAC, "ap-1", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(report.session_count, 3);
        assert_eq!(report.average_duration_ms, 90_000);
        assert_eq!(report.disconnect_reasons[&DisconnectReason::Roamed], 2);
        assert_eq!(report.disconnect_reasons[&DisconnectReason::Timeout], 1);
        // 90s sessions beat the 60s minimum
        assert_eq!(report.success_rate, 1.0);
    }
}
