//! Session records and per-client profile rollups

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use wtm_common::utils::hour_and_weekday;
use wtm_common::{DeviceId, DisconnectReason, Mac, SessionConfig};

/// One activity burst inside a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionActivity {
    pub kind: String,
    pub duration_ms: u64,
    pub bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// Environment captured when a session opens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub hour_of_day: u8,
    /// Monday = 0 .. Sunday = 6
    pub weekday: u8,
    pub known_clients: usize,
}

/// One association stretch between a client and an AP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Derived from client, AP and start time
    pub id: String,
    pub client_mac: Mac,
    pub device_id: DeviceId,
    pub ssid: String,
    pub interface: String,
    pub started_at: DateTime<Utc>,
    /// Advanced on every observation; set to the close time on close
    pub last_update: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub disconnect_reason: Option<DisconnectReason>,
    /// Rollup in [0, 1], computed on close
    pub quality_score: f64,
    pub total_bytes: u64,
    pub activities: VecDeque<SessionActivity>,
    pub context: SessionContext,
}

impl Session {
    pub fn open(
        mac: &str,
        device_id: &str,
        ssid: &str,
        interface: &str,
        ts: DateTime<Utc>,
        known_clients: usize,
    ) -> Self {
        let (hour_of_day, weekday) = hour_and_weekday(ts);
        Session {
            id: format!("{mac}-{device_id}-{}", ts.timestamp_millis()),
            client_mac: mac.to_string(),
            device_id: device_id.to_string(),
            ssid: ssid.to_string(),
            interface: interface.to_string(),
            started_at: ts,
            last_update: ts,
            ended_at: None,
            duration_ms: 0,
            disconnect_reason: None,
            quality_score: 0.0,
            total_bytes: 0,
            activities: VecDeque::new(),
            context: SessionContext {
                hour_of_day,
                weekday,
                known_clients,
            },
        }
    }

    /// Advance the session on a fresh observation of the same pair
    pub fn advance(&mut self, ts: DateTime<Utc>) {
        if ts > self.last_update {
            self.last_update = ts;
        }
    }

    /// Append an activity under the configured cap
    pub fn push_activity(&mut self, activity: SessionActivity, capacity: usize) {
        self.total_bytes = self.total_bytes.saturating_add(activity.bytes);
        if self.activities.len() >= capacity {
            self.activities.pop_front();
        }
        self.activities.push_back(activity);
    }

    /// Close the session and compute its quality rollup
    ///
    /// Base 0.5, +0.3 when the session moved more bytes than the
    /// throughput threshold, +0.2 when it lasted longer than an hour.
    pub fn close(&mut self, reason: DisconnectReason, ts: DateTime<Utc>, config: &SessionConfig) {
        let end = ts.max(self.started_at);
        self.ended_at = Some(end);
        self.last_update = end;
        self.disconnect_reason = Some(reason);
        self.duration_ms = (end - self.started_at).num_milliseconds();

        let mut quality: f64 = 0.5;
        if self.total_bytes > config.throughput_threshold_bytes {
            quality += 0.3;
        }
        if self.duration_ms > 3600 * 1000 {
            quality += 0.2;
        }
        self.quality_score = quality.clamp(0.0, 1.0);
    }

    pub fn is_closed(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Recurring session-timing patterns, derived from at least three
/// closed sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatterns {
    pub typical_duration_ms: i64,
    pub most_active_hour: u8,
    pub weekday_share: f64,
}

/// AP/SSID preferences, derived from at least five closed sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientPreferences {
    pub preferred_ap: DeviceId,
    pub preferred_ssid: String,
    /// Share of sessions spent on the preferred AP
    pub preferred_ap_share: f64,
}

/// Connection reliability rollup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReliabilityMetrics {
    pub total_uptime_ms: i64,
    pub disconnect_count: u64,
    pub flapping: bool,
    /// Share of sessions longer than the minimum duration
    pub connection_success_rate: f64,
}

/// Rolling per-client behavioral profile
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientProfile {
    pub patterns: Option<SessionPatterns>,
    pub preferences: Option<ClientPreferences>,
    pub reliability: Option<ReliabilityMetrics>,
}

impl ClientProfile {
    /// Recompute the enabled analyses from closed-session history
    pub fn recompute(&mut self, history: &VecDeque<Session>, config: &SessionConfig) {
        if config.enable_pattern_analysis && history.len() >= 3 {
            self.patterns = Some(Self::patterns_of(history));
        }
        if config.enable_preference_analysis && history.len() >= 5 {
            self.preferences = Some(Self::preferences_of(history));
        }
        if config.enable_reliability_analysis && !history.is_empty() {
            self.reliability = Some(Self::reliability_of(history, config));
        }
    }

    fn patterns_of(history: &VecDeque<Session>) -> SessionPatterns {
        let total_ms: i64 = history.iter().map(|s| s.duration_ms).sum();
        let mut hour_counts = [0usize; 24];
        let mut weekday_sessions = 0usize;
        for session in history {
            hour_counts[session.context.hour_of_day as usize % 24] += 1;
            if session.context.weekday < 5 {
                weekday_sessions += 1;
            }
        }
        let most_active_hour = hour_counts
            .iter()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(hour, _)| hour as u8)
            .unwrap_or(0);
        SessionPatterns {
            typical_duration_ms: total_ms / history.len() as i64,
            most_active_hour,
            weekday_share: weekday_sessions as f64 / history.len() as f64,
        }
    }

    fn preferences_of(history: &VecDeque<Session>) -> ClientPreferences {
        let mut ap_counts: HashMap<&str, usize> = HashMap::new();
        for session in history {
            *ap_counts.entry(session.device_id.as_str()).or_default() += 1;
        }
        let (preferred_ap, count) = ap_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .unwrap_or(("", 0));
        let preferred_ssid = history
            .iter()
            .rev()
            .find(|s| s.device_id == preferred_ap)
            .map(|s| s.ssid.clone())
            .unwrap_or_default();
        ClientPreferences {
            preferred_ap: preferred_ap.to_string(),
            preferred_ssid,
            preferred_ap_share: count as f64 / history.len() as f64,
        }
    }

    fn reliability_of(history: &VecDeque<Session>, config: &SessionConfig) -> ReliabilityMetrics {
        let min_ms = config.min_session_duration_secs as i64 * 1000;
        let total_uptime_ms: i64 = history.iter().map(|s| s.duration_ms).sum();
        let successful = history.iter().filter(|s| s.duration_ms >= min_ms).count();

        // Three or more sub-minimum sessions inside the last hour of
        // recorded history reads as flapping.
        let newest = history.back().map(|s| s.last_update).unwrap_or_else(Utc::now);
        let hour_ago = newest - chrono::Duration::hours(1);
        let recent_short = history
            .iter()
            .filter(|s| s.last_update >= hour_ago && s.duration_ms < min_ms)
            .count();

        ReliabilityMetrics {
            total_uptime_ms,
            disconnect_count: history.len() as u64,
            flapping: recent_short >= 3,
            connection_success_rate: successful as f64 / history.len() as f64,
        }
    }
}

/// Aggregate over closed sessions in a query window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityReport {
    pub client_mac: Mac,
    pub device_id: DeviceId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub session_count: usize,
    pub average_duration_ms: i64,
    pub average_quality: f64,
    pub success_rate: f64,
    pub disconnect_reasons: HashMap<DisconnectReason, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed_session(duration_secs: i64, bytes: u64, config: &SessionConfig) -> Session {
        let start = Utc::now() - chrono::Duration::seconds(duration_secs);
        let mut session = Session::open("aa:bb:cc:dd:ee:01", "ap-1", "corp", "wlan0", start, 1);
        session.total_bytes = bytes;
        session.close(DisconnectReason::Roamed, start + chrono::Duration::seconds(duration_secs), config);
        session
    }

    #[test]
    fn close_computes_duration_and_quality() {
        let config = SessionConfig::default();
        let session = closed_session(2 * 3600, 5_000_000, &config);
        assert_eq!(session.duration_ms, 2 * 3600 * 1000);
        // base + throughput bonus + long-session bonus
        assert!((session.quality_score - 1.0).abs() < 1e-9);

        let short = closed_session(30, 0, &config);
        assert!((short.quality_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn activity_list_is_bounded() {
        let mut session = Session::open("aa:bb:cc:dd:ee:01", "ap-1", "corp", "wlan0", Utc::now(), 1);
        for i in 0..10 {
            session.push_activity(
                SessionActivity {
                    kind: "browsing".to_string(),
                    duration_ms: 100,
                    bytes: i,
                    timestamp: Utc::now(),
                },
                4,
            );
        }
        assert_eq!(session.activities.len(), 4);
        assert_eq!(session.total_bytes, (0..10).sum::<u64>());
    }

    #[test]
    fn profile_thresholds_gate_analyses() {
        let config = SessionConfig::default();
        let mut history = VecDeque::new();
        let mut profile = ClientProfile::default();

        history.push_back(closed_session(120, 0, &config));
        profile.recompute(&history, &config);
        assert!(profile.patterns.is_none());
        assert!(profile.preferences.is_none());
        assert!(profile.reliability.is_some());

        for _ in 0..2 {
            history.push_back(closed_session(120, 0, &config));
        }
        profile.recompute(&history, &config);
        assert!(profile.patterns.is_some());
        assert!(profile.preferences.is_none());

        for _ in 0..2 {
            history.push_back(closed_session(120, 0, &config));
        }
        profile.recompute(&history, &config);
        assert!(profile.preferences.is_some());
    }

    #[test]
    fn flapping_detected_from_short_recent_sessions() {
        let config = SessionConfig::default();
        let mut history = VecDeque::new();
        for _ in 0..4 {
            history.push_back(closed_session(10, 0, &config));
        }
        let metrics = ClientProfile::reliability_of(&history, &config);
        assert!(metrics.flapping);
        assert_eq!(metrics.connection_success_rate, 0.0);
    }
}
