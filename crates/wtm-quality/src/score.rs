//! Connection metrics and quality scoring

use crate::trend::TrendAnalysis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use wtm_common::{DeviceId, Mac, QualityGrade, QualityThresholds};

/// Signal statistics pulled from the collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalStats {
    pub average_rssi: f64,
    pub latest_rssi: i32,
    pub noise_floor: Option<i32>,
    pub sample_count: usize,
}

/// Raw link counters used to derive throughput between checks
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkCounters {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
}

impl LinkCounters {
    pub fn total_bytes(&self) -> u64 {
        self.tx_bytes.saturating_add(self.rx_bytes)
    }
}

/// One passively observed performance measurement
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub jitter_ms: Option<f64>,
}

/// Rolling performance statistics for one pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub throughput_mbps: Option<f64>,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub last_sample: Option<DateTime<Utc>>,
}

/// Session-derived stability statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StabilityStats {
    pub total_uptime_ms: i64,
    pub disconnect_count: u64,
    pub flapping: bool,
    pub success_rate: f64,
}

/// Overall quality with sub-scores; every value stays in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub overall: f64,
    pub signal: f64,
    pub performance: f64,
    pub stability: f64,
    pub reliability: f64,
    pub user_experience: f64,
    pub grade: QualityGrade,
}

impl Default for QualityScore {
    fn default() -> Self {
        QualityScore {
            overall: 0.0,
            signal: 0.0,
            performance: 0.0,
            stability: 0.0,
            reliability: 0.0,
            user_experience: 0.0,
            grade: QualityGrade::Critical,
        }
    }
}

impl QualityScore {
    /// Compute sub-scores and the weighted overall score
    ///
    /// Overall = 0.2 signal + 0.4 performance + 0.2 stability +
    /// 0.2 reliability. Missing inputs score neutrally at 0.5.
    pub fn compute(
        signal: Option<&SignalStats>,
        performance: &PerformanceStats,
        stability: Option<&StabilityStats>,
        thresholds: &QualityThresholds,
    ) -> Self {
        let signal_score = signal
            .map(|s| thresholds.signal_dbm.score(s.average_rssi))
            .unwrap_or(0.5);

        let mut perf_parts = Vec::new();
        if let Some(v) = performance.throughput_mbps {
            perf_parts.push(thresholds.throughput_mbps.score(v));
        }
        if let Some(v) = performance.latency_ms {
            perf_parts.push(thresholds.latency_ms.score(v));
        }
        if let Some(v) = performance.packet_loss {
            perf_parts.push(thresholds.packet_loss.score(v));
        }
        if let Some(v) = performance.jitter_ms {
            perf_parts.push(thresholds.jitter_ms.score(v));
        }
        let performance_score = if perf_parts.is_empty() {
            0.5
        } else {
            perf_parts.iter().sum::<f64>() / perf_parts.len() as f64
        };

        let (stability_score, reliability_score) = match stability {
            Some(s) => {
                let mut stab = 1.0 / (1.0 + s.disconnect_count as f64 / 10.0);
                if s.flapping {
                    stab -= 0.3;
                }
                (stab.clamp(0.0, 1.0), s.success_rate.clamp(0.0, 1.0))
            }
            None => (0.5, 0.5),
        };

        let overall = (0.2 * signal_score
            + 0.4 * performance_score
            + 0.2 * stability_score
            + 0.2 * reliability_score)
            .clamp(0.0, 1.0);

        QualityScore {
            overall,
            signal: signal_score,
            performance: performance_score,
            stability: stability_score,
            reliability: reliability_score,
            user_experience: (0.5 * signal_score + 0.5 * performance_score).clamp(0.0, 1.0),
            grade: QualityGrade::from_score(overall),
        }
    }
}

/// Point-in-time quality record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub overall: f64,
    pub signal: f64,
    pub throughput: f64,
    pub latency: f64,
    pub stability: f64,
}

/// Everything the monitor tracks for one (AP, client) pair
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    pub device_id: DeviceId,
    pub mac: Mac,
    pub signal: Option<SignalStats>,
    pub performance: PerformanceStats,
    pub stability: Option<StabilityStats>,
    pub score: QualityScore,
    pub snapshots: VecDeque<QualitySnapshot>,
    pub trend: Option<TrendAnalysis>,
    pub last_counters: Option<(LinkCounters, DateTime<Utc>)>,
    pub monitored_since: DateTime<Utc>,
}

impl ConnectionMetrics {
    pub fn new(device_id: &str, mac: &str, now: DateTime<Utc>) -> Self {
        ConnectionMetrics {
            device_id: device_id.to_string(),
            mac: mac.to_string(),
            signal: None,
            performance: PerformanceStats::default(),
            stability: None,
            score: QualityScore::default(),
            snapshots: VecDeque::new(),
            trend: None,
            last_counters: None,
            monitored_since: now,
        }
    }

    /// Fold fresh counters in, deriving throughput from the delta
    pub fn update_counters(&mut self, counters: LinkCounters, now: DateTime<Utc>) {
        if let Some((previous, at)) = self.last_counters {
            let elapsed = (now - at).num_milliseconds();
            if elapsed > 0 {
                let delta = counters.total_bytes().saturating_sub(previous.total_bytes());
                let mbps = (delta as f64 * 8.0 / 1_000_000.0) / (elapsed as f64 / 1000.0);
                self.performance.throughput_mbps = Some(mbps);
            }
        }
        self.last_counters = Some((counters, now));
    }

    pub fn push_snapshot(&mut self, snapshot: QualitySnapshot, capacity: usize) {
        if self.snapshots.len() >= capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_uses_spec_weights() {
        let thresholds = QualityThresholds::default();
        let signal = SignalStats {
            average_rssi: -45.0,
            latest_rssi: -45,
            noise_floor: None,
            sample_count: 10,
        };
        let performance = PerformanceStats {
            throughput_mbps: Some(150.0),
            latency_ms: Some(5.0),
            packet_loss: Some(0.0),
            jitter_ms: Some(1.0),
            last_sample: None,
        };
        let stability = StabilityStats {
            total_uptime_ms: 3_600_000,
            disconnect_count: 0,
            flapping: false,
            success_rate: 1.0,
        };
        let score = QualityScore::compute(Some(&signal), &performance, Some(&stability), &thresholds);
        assert!((score.overall - 1.0).abs() < 1e-9);
        assert_eq!(score.grade, QualityGrade::Excellent);
    }

    #[test]
    fn missing_inputs_score_neutral() {
        let thresholds = QualityThresholds::default();
        let score = QualityScore::compute(None, &PerformanceStats::default(), None, &thresholds);
        assert!((score.overall - 0.5).abs() < 1e-9);
        assert_eq!(score.grade, QualityGrade::Fair);
    }

    #[test]
    fn flapping_penalizes_stability() {
        let thresholds = QualityThresholds::default();
        let flapping = StabilityStats {
            total_uptime_ms: 0,
            disconnect_count: 5,
            flapping: true,
            success_rate: 0.2,
        };
        let score =
            QualityScore::compute(None, &PerformanceStats::default(), Some(&flapping), &thresholds);
        assert!(score.stability < 0.5);
        assert!((score.reliability - 0.2).abs() < 1e-9);
    }

    #[test]
    fn throughput_derives_from_counter_delta() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(10);
        let mut metrics = ConnectionMetrics::new("ap-1", "aa:bb:cc:dd:ee:01", t0);

        metrics.update_counters(
            LinkCounters {
                tx_bytes: 0,
                rx_bytes: 0,
                tx_packets: 0,
                rx_packets: 0,
            },
            t0,
        );
        metrics.update_counters(
            LinkCounters {
                tx_bytes: 6_250_000,
                rx_bytes: 6_250_000,
                tx_packets: 1000,
                rx_packets: 1000,
            },
            t1,
        );
        // 12.5 MB over 10 s = 10 Mbit/s
        let mbps = metrics.performance.throughput_mbps.unwrap();
        assert!((mbps - 10.0).abs() < 1e-6);
    }

    #[test]
    fn snapshot_ring_is_bounded() {
        let now = Utc::now();
        let mut metrics = ConnectionMetrics::new("ap-1", "aa:bb:cc:dd:ee:01", now);
        for i in 0..8 {
            metrics.push_snapshot(
                QualitySnapshot {
                    timestamp: now,
                    overall: i as f64 / 10.0,
                    signal: 0.5,
                    throughput: 0.5,
                    latency: 0.5,
                    stability: 0.5,
                },
                5,
            );
        }
        assert_eq!(metrics.snapshots.len(), 5);
    }
}
