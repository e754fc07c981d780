//! Per-client behavioral baselines

use crate::detector::SessionSummary;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wtm_common::utils::{mean, std_dev};
use wtm_common::{AnomalyConfig, DeviceId, Mac, RoamingEvent};

/// Share of sessions a single hour needs before it counts as a
/// preferred time window
const PREFERRED_HOUR_SHARE: f64 = 0.15;

/// Statistical fingerprint of one client's normal behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub mac: Mac,
    pub sample_size: usize,
    /// Roaming events per hour
    pub roam_freq_mean: f64,
    pub roam_freq_std: f64,
    /// Signal quality in [0, 1]
    pub signal_quality_mean: f64,
    pub signal_quality_std: f64,
    pub session_duration_mean_ms: f64,
    pub session_duration_std_ms: f64,
    pub preferred_aps: Vec<DeviceId>,
    /// Hours of day carrying a meaningful share of sessions
    pub preferred_time_windows: Vec<u8>,
    pub learned_at: DateTime<Utc>,
}

impl BaselineProfile {
    /// Learn a baseline from session and roaming history
    ///
    /// Returns `None` until `min_samples_for_baseline` sessions exist
    /// inside the learning period.
    pub fn learn(
        mac: &str,
        sessions: &[SessionSummary],
        roams: &[RoamingEvent],
        config: &AnomalyConfig,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let window_start = now - Duration::seconds(config.baseline_learning_period_secs as i64);
        let recent: Vec<&SessionSummary> = sessions
            .iter()
            .filter(|s| s.started_at >= window_start)
            .collect();
        if recent.len() < config.min_samples_for_baseline {
            return None;
        }

        let durations: Vec<f64> = recent.iter().map(|s| s.duration_ms as f64).collect();
        let qualities: Vec<f64> = recent.iter().map(|s| s.quality_score).collect();

        // Hourly roam counts across the observed span give the
        // frequency distribution.
        let recent_roams: Vec<&RoamingEvent> = roams
            .iter()
            .filter(|r| r.timestamp >= window_start)
            .collect();
        let mut hourly: HashMap<i64, u32> = HashMap::new();
        for roam in &recent_roams {
            *hourly.entry(roam.timestamp.timestamp() / 3600).or_default() += 1;
        }
        let span_hours = recent_roams
            .first()
            .zip(recent_roams.last())
            .map(|(first, last)| {
                ((last.timestamp - first.timestamp).num_hours().unsigned_abs() + 1) as usize
            })
            .unwrap_or(1);
        let mut counts: Vec<f64> = hourly.values().map(|c| *c as f64).collect();
        counts.resize(span_hours.max(counts.len()), 0.0);

        let mut ap_counts: HashMap<&str, usize> = HashMap::new();
        let mut hour_counts = [0usize; 24];
        for session in &recent {
            *ap_counts.entry(session.device_id.as_str()).or_default() += 1;
            hour_counts[session.hour_of_day as usize % 24] += 1;
        }
        let mut preferred_aps: Vec<(usize, DeviceId)> = ap_counts
            .into_iter()
            .map(|(ap, count)| (count, ap.to_string()))
            .collect();
        preferred_aps.sort_by(|a, b| b.0.cmp(&a.0));

        let preferred_time_windows = hour_counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count as f64 / recent.len() as f64 >= PREFERRED_HOUR_SHARE)
            .map(|(hour, _)| hour as u8)
            .collect();

        Some(BaselineProfile {
            mac: mac.to_string(),
            sample_size: recent.len(),
            roam_freq_mean: mean(&counts),
            roam_freq_std: std_dev(&counts),
            signal_quality_mean: mean(&qualities),
            signal_quality_std: std_dev(&qualities),
            session_duration_mean_ms: mean(&durations),
            session_duration_std_ms: std_dev(&durations),
            preferred_aps: preferred_aps.into_iter().map(|(_, ap)| ap).take(3).collect(),
            preferred_time_windows,
            learned_at: now,
        })
    }

    /// Adaptive upper bound on roaming frequency
    pub fn roam_freq_threshold(&self) -> f64 {
        self.roam_freq_mean + 2.0 * self.roam_freq_std
    }

    /// Adaptive lower bound on signal quality
    pub fn signal_threshold(&self) -> f64 {
        self.signal_quality_mean - 2.0 * self.signal_quality_std
    }

    /// Sigma deviation of a value against a (mean, std) pair
    pub fn deviation(value: f64, mean: f64, std: f64) -> f64 {
        if std <= f64::EPSILON {
            if (value - mean).abs() <= f64::EPSILON {
                0.0
            } else {
                // Any departure from a zero-variance baseline is a
                // full-scale deviation.
                4.0_f64.copysign(value - mean)
            }
        } else {
            (value - mean) / std
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(hours_ago: i64, duration_ms: i64, quality: f64, hour: u8) -> SessionSummary {
        SessionSummary {
            started_at: Utc::now() - Duration::hours(hours_ago),
            duration_ms,
            quality_score: quality,
            device_id: "ap-1".to_string(),
            hour_of_day: hour,
        }
    }

    #[test]
    fn baseline_requires_minimum_samples() {
        let config = AnomalyConfig::default();
        let sessions: Vec<SessionSummary> =
            (0..5).map(|i| summary(i, 600_000, 0.8, 10)).collect();
        assert!(BaselineProfile::learn("aa:bb:cc:dd:ee:01", &sessions, &[], &config, Utc::now()).is_none());
    }

    #[test]
    fn baseline_ignores_sessions_outside_learning_period() {
        let config = AnomalyConfig {
            min_samples_for_baseline: 3,
            baseline_learning_period_secs: 24 * 3600,
            ..AnomalyConfig::default()
        };
        // Two recent, ten ancient.
        let mut sessions: Vec<SessionSummary> =
            (0..10).map(|i| summary(100 + i, 600_000, 0.8, 10)).collect();
        sessions.push(summary(1, 600_000, 0.8, 10));
        sessions.push(summary(2, 600_000, 0.8, 10));
        assert!(BaselineProfile::learn("aa:bb:cc:dd:ee:01", &sessions, &[], &config, Utc::now()).is_none());
    }

    #[test]
    fn learned_baseline_captures_statistics() {
        let config = AnomalyConfig {
            min_samples_for_baseline: 4,
            ..AnomalyConfig::default()
        };
        let sessions: Vec<SessionSummary> = vec![
            summary(1, 500_000, 0.8, 9),
            summary(2, 700_000, 0.9, 9),
            summary(3, 600_000, 0.7, 9),
            summary(4, 600_000, 0.8, 14),
        ];
        let baseline =
            BaselineProfile::learn("aa:bb:cc:dd:ee:01", &sessions, &[], &config, Utc::now()).unwrap();
        assert_eq!(baseline.sample_size, 4);
        assert!((baseline.session_duration_mean_ms - 600_000.0).abs() < 1e-6);
        assert!((baseline.signal_quality_mean - 0.8).abs() < 1e-9);
        assert_eq!(baseline.preferred_aps, vec!["ap-1".to_string()]);
        // Hour 9 carries 75% of sessions, hour 14 carries 25%.
        assert!(baseline.preferred_time_windows.contains(&9));
        assert!(baseline.preferred_time_windows.contains(&14));
    }

    #[test]
    fn deviation_handles_zero_variance() {
        assert_eq!(BaselineProfile::deviation(5.0, 5.0, 0.0), 0.0);
        assert!(BaselineProfile::deviation(6.0, 5.0, 0.0) >= 4.0);
        assert!((BaselineProfile::deviation(7.0, 5.0, 1.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn thresholds_are_two_sigma() {
        let baseline = BaselineProfile {
            mac: "aa:bb:cc:dd:ee:01".to_string(),
            sample_size: 10,
            roam_freq_mean: 2.0,
            roam_freq_std: 1.0,
            signal_quality_mean: 0.8,
            signal_quality_std: 0.05,
            session_duration_mean_ms: 0.0,
            session_duration_std_ms: 0.0,
            preferred_aps: vec![],
            preferred_time_windows: vec![],
            learned_at: Utc::now(),
        };
        assert!((baseline.roam_freq_threshold() - 4.0).abs() < 1e-9);
        assert!((baseline.signal_threshold() - 0.7).abs() < 1e-9);
    }
}
