//! Configuration for the WiFi topology monitor

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub collector: CollectorConfig,
    pub sessions: SessionConfig,
    pub roaming: RoamingConfig,
    pub quality: QualityConfig,
    pub anomaly: AnomalyConfig,
    pub alerting: AlertingConfig,
    pub realtime: RealtimeConfig,
}

impl Config {
    /// Validate the configuration, returning the first violation found
    pub fn validate(&self) -> Result<()> {
        if self.collector.max_signal_samples == 0 {
            return Err(Error::Configuration(
                "collector.max_signal_samples must be positive".to_string(),
            ));
        }
        if self.sessions.max_sessions_per_client == 0 {
            return Err(Error::Configuration(
                "sessions.max_sessions_per_client must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.roaming.min_confidence_threshold) {
            return Err(Error::Configuration(
                "roaming.min_confidence_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.roaming.min_roaming_gap_ms >= self.roaming.max_roaming_gap_ms {
            return Err(Error::Configuration(
                "roaming.min_roaming_gap_ms must be below max_roaming_gap_ms".to_string(),
            ));
        }
        if self.quality.trend_window_size < 2 {
            return Err(Error::Configuration(
                "quality.trend_window_size must be at least 2".to_string(),
            ));
        }
        if self.anomaly.min_samples_for_baseline == 0 {
            return Err(Error::Configuration(
                "anomaly.min_samples_for_baseline must be positive".to_string(),
            ));
        }
        if self.realtime.channel_buffer_size == 0 {
            return Err(Error::Configuration(
                "realtime.channel_buffer_size must be positive".to_string(),
            ));
        }
        if self.realtime.worker_pool_size == 0 {
            return Err(Error::Configuration(
                "realtime.worker_pool_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client collector (C1) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Capacity of the per-client signal history ring
    pub max_signal_samples: usize,
    /// Capacity of the per-client AP connection history ring
    pub max_ap_connections: usize,
    /// Interval of the weak-signal scan in seconds
    pub signal_sample_interval_secs: u64,
    /// RSSI below which a client is considered weak, in dBm
    pub weak_signal_threshold_dbm: i32,
    /// Interval of the AP quality scan in seconds
    pub quality_check_interval_secs: u64,
    /// Retention window for signal points in seconds
    pub signal_history_retention_secs: u64,
    /// Retention window for roaming events in seconds
    pub roaming_history_retention_secs: u64,
    /// Idle time after which a client is dropped from AP rosters, in seconds
    pub client_offline_timeout_secs: u64,
    /// Interval of the cleanup sweep in seconds
    pub cleanup_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            max_signal_samples: 500,
            max_ap_connections: 50,
            signal_sample_interval_secs: 30,
            weak_signal_threshold_dbm: -75,
            quality_check_interval_secs: 60,
            signal_history_retention_secs: 24 * 3600,
            roaming_history_retention_secs: 24 * 3600,
            client_offline_timeout_secs: 300,
            cleanup_interval_secs: 3600,
        }
    }
}

/// Connection history tracker (C2) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which an active session is closed, in seconds
    pub session_timeout_secs: u64,
    /// Capacity of the per-client closed-session history
    pub max_sessions_per_client: usize,
    /// Capacity of the per-session activity list
    pub max_activities_per_session: usize,
    /// Interval of the timeout sweep in seconds
    pub processing_interval_secs: u64,
    /// Sessions shorter than this do not count as successful, in seconds
    pub min_session_duration_secs: u64,
    /// Throughput above which session quality gets its bonus, in bytes
    pub throughput_threshold_bytes: u64,
    pub enable_pattern_analysis: bool,
    pub enable_preference_analysis: bool,
    pub enable_reliability_analysis: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            session_timeout_secs: 300,
            max_sessions_per_client: 100,
            max_activities_per_session: 200,
            processing_interval_secs: 60,
            min_session_duration_secs: 60,
            throughput_threshold_bytes: 1_000_000,
            enable_pattern_analysis: true,
            enable_preference_analysis: true,
            enable_reliability_analysis: true,
        }
    }
}

/// Roaming inference and detection (C3/C4) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoamingConfig {
    /// Signal improvement that suggests a deliberate roam, in dB
    pub signal_delta_threshold_db: i32,
    /// Transitions faster than this are ping-pong suspects, in milliseconds
    pub min_roaming_gap_ms: u64,
    /// Transitions slower than this are unrelated reassociations, in milliseconds
    pub max_roaming_gap_ms: u64,
    /// Events below this confidence are dropped
    pub min_confidence_threshold: f64,
    /// RSSI below which the prior AP counts as weak, in dBm
    pub weak_signal_threshold_dbm: i32,
    /// Roams per hour above which a client roams excessively
    pub excessive_roaming_per_hour: u32,
    /// Window for the ping-pong return check, in milliseconds
    pub ping_pong_time_threshold_ms: u64,
    /// Capacity of the per-client confirmed-event history
    pub max_events_per_client: usize,
    /// Capacity of the per-client inference signal ring
    pub max_signal_samples: usize,
}

impl Default for RoamingConfig {
    fn default() -> Self {
        RoamingConfig {
            signal_delta_threshold_db: 10,
            min_roaming_gap_ms: 500,
            max_roaming_gap_ms: 60_000,
            min_confidence_threshold: 0.5,
            weak_signal_threshold_dbm: -75,
            excessive_roaming_per_hour: 10,
            ping_pong_time_threshold_ms: 30_000,
            max_events_per_client: 200,
            max_signal_samples: 100,
        }
    }
}

/// Stepwise thresholds for one quality metric
///
/// Values between steps score 1.0 / 0.8 / 0.6 / 0.4, anything past
/// `poor` scores 0.2. `higher_is_better` flips the comparison for
/// metrics like throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub excellent: f64,
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
    pub higher_is_better: bool,
}

impl MetricThresholds {
    /// Map a raw value onto the stepwise score ladder
    pub fn score(&self, value: f64) -> f64 {
        let beats = |threshold: f64| {
            if self.higher_is_better {
                value >= threshold
            } else {
                value <= threshold
            }
        };
        if beats(self.excellent) {
            1.0
        } else if beats(self.good) {
            0.8
        } else if beats(self.fair) {
            0.6
        } else if beats(self.poor) {
            0.4
        } else {
            0.2
        }
    }
}

/// Per-metric threshold ladders for quality scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    pub signal_dbm: MetricThresholds,
    pub latency_ms: MetricThresholds,
    pub packet_loss: MetricThresholds,
    pub throughput_mbps: MetricThresholds,
    pub jitter_ms: MetricThresholds,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        QualityThresholds {
            signal_dbm: MetricThresholds {
                excellent: -50.0,
                good: -60.0,
                fair: -70.0,
                poor: -80.0,
                higher_is_better: true,
            },
            latency_ms: MetricThresholds {
                excellent: 10.0,
                good: 30.0,
                fair: 80.0,
                poor: 150.0,
                higher_is_better: false,
            },
            packet_loss: MetricThresholds {
                excellent: 0.001,
                good: 0.01,
                fair: 0.03,
                poor: 0.08,
                higher_is_better: false,
            },
            throughput_mbps: MetricThresholds {
                excellent: 100.0,
                good: 50.0,
                fair: 20.0,
                poor: 5.0,
                higher_is_better: true,
            },
            jitter_ms: MetricThresholds {
                excellent: 2.0,
                good: 10.0,
                fair: 20.0,
                poor: 50.0,
                higher_is_better: false,
            },
        }
    }
}

/// Quality monitor (C5) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Interval of the quality recomputation loop in seconds
    pub quality_check_interval_secs: u64,
    /// Interval of the trend analysis loop in seconds
    pub trend_analysis_interval_secs: u64,
    /// Number of snapshots the trend fit looks back over
    pub trend_window_size: usize,
    /// Degrading-trend strength above which an alert fires
    pub performance_drop_threshold: f64,
    /// Minimum age of an unresolved alert before a fresh one of the
    /// same type may be created, in seconds
    pub alert_cooldown_secs: u64,
    /// Capacity of the per-pair snapshot ring
    pub max_snapshots: usize,
    pub thresholds: QualityThresholds,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            quality_check_interval_secs: 60,
            trend_analysis_interval_secs: 300,
            trend_window_size: 10,
            performance_drop_threshold: 0.1,
            alert_cooldown_secs: 600,
            max_snapshots: 100,
            thresholds: QualityThresholds::default(),
        }
    }
}

/// Anomaly detector (C6) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Sessions required before a baseline is considered learned
    pub min_samples_for_baseline: usize,
    /// Window within which those sessions must fall, in seconds
    pub baseline_learning_period_secs: u64,
    /// Interval of the detection loop in seconds
    pub detection_interval_secs: u64,
    /// Feature-vector score above which an unusual pattern is flagged
    pub anomaly_confidence_threshold: f64,
    /// Time-window deviation above which a time anomaly is flagged
    pub pattern_deviation_threshold: f64,
    /// Re-detections within this window merge into the open case, in seconds
    pub cooldown_secs: u64,
    /// Consecutive idle detection windows before a client counts as stuck
    pub stuck_client_windows: u32,
    /// Cap on retained anomaly cases
    pub max_cases: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            min_samples_for_baseline: 10,
            baseline_learning_period_secs: 7 * 24 * 3600,
            detection_interval_secs: 300,
            anomaly_confidence_threshold: 0.7,
            pattern_deviation_threshold: 0.5,
            cooldown_secs: 1800,
            stuck_client_windows: 6,
            max_cases: 1000,
        }
    }
}

/// Alerting system (C7) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Window within which same-key alerts merge instead of duplicating, in seconds
    pub duplicate_window_secs: u64,
    /// Interval of the escalation advancement loop in seconds
    pub escalation_check_interval_secs: u64,
    /// Retry cap for failed notification deliveries
    pub notification_retries: u32,
    /// Interval of the notification retry loop in seconds
    pub notification_retry_interval_secs: u64,
    /// Per-delivery transport timeout in seconds
    pub notification_timeout_secs: u64,
    /// Interval of the rule evaluation loop in seconds
    pub alert_processing_interval_secs: u64,
    /// Budget for one rule evaluation pass in seconds
    pub processing_timeout_secs: u64,
    /// Cap on concurrently active alerts
    pub max_active_alerts: usize,
    /// Cap on retained resolved/closed alerts
    pub max_history: usize,
    pub enable_escalation: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        AlertingConfig {
            duplicate_window_secs: 300,
            escalation_check_interval_secs: 60,
            notification_retries: 3,
            notification_retry_interval_secs: 60,
            notification_timeout_secs: 10,
            alert_processing_interval_secs: 30,
            processing_timeout_secs: 10,
            max_active_alerts: 1000,
            max_history: 1000,
            enable_escalation: true,
        }
    }
}

/// Realtime updater (C8) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Capacity of the bounded event channel
    pub channel_buffer_size: usize,
    /// Number of dispatch workers
    pub worker_pool_size: usize,
    pub enable_batching: bool,
    /// Cap on events per batch flush
    pub batch_size: usize,
    /// Batch flush interval in milliseconds
    pub batch_timeout_ms: u64,
    /// Subscriptions idle past this are deactivated, in seconds
    pub subscription_timeout_secs: u64,
    /// Retry cap for failed event processing
    pub max_retries: u32,
    /// Base backoff for event retries in milliseconds
    pub retry_backoff_ms: u64,
    /// Cap on concurrently registered subscriptions
    pub max_subscriptions: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        RealtimeConfig {
            channel_buffer_size: 1000,
            worker_pool_size: 4,
            enable_batching: false,
            batch_size: 50,
            batch_timeout_ms: 500,
            subscription_timeout_secs: 3600,
            max_retries: 3,
            retry_backoff_ms: 1000,
            max_subscriptions: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn bad_confidence_rejected() {
        let mut config = Config::default();
        config.roaming.min_confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_roaming_gaps_rejected() {
        let mut config = Config::default();
        config.roaming.min_roaming_gap_ms = 90_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn metric_thresholds_score_ladder() {
        let thresholds = QualityThresholds::default();
        assert_eq!(thresholds.signal_dbm.score(-45.0), 1.0);
        assert_eq!(thresholds.signal_dbm.score(-65.0), 0.6);
        assert_eq!(thresholds.signal_dbm.score(-90.0), 0.2);
        assert_eq!(thresholds.latency_ms.score(5.0), 1.0);
        assert_eq!(thresholds.latency_ms.score(200.0), 0.2);
        assert_eq!(thresholds.throughput_mbps.score(60.0), 0.8);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&serialized).unwrap();
        assert_eq!(
            parsed.collector.max_signal_samples,
            config.collector.max_signal_samples
        );
        assert_eq!(parsed.realtime.worker_pool_size, config.realtime.worker_pool_size);
    }
}
