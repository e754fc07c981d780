//! Quality monitor component

use crate::score::{
    ConnectionMetrics, LinkCounters, PerformanceSample, QualityScore, QualitySnapshot, SignalStats,
    StabilityStats,
};
use crate::trend::{TrendAnalysis, TrendDirection};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::{
    AlertRequest, AlertSink, AlertType, DeviceId, Error, Mac, QualityConfig, Result, Severity,
};

/// Provider of signal statistics and link counters, implemented over
/// the collector
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn signal_stats(&self, device_id: &str, mac: &str) -> Option<SignalStats>;
    async fn link_counters(&self, device_id: &str, mac: &str) -> Option<LinkCounters>;
}

/// Provider of session-derived stability statistics, implemented over
/// the connection tracker
#[async_trait]
pub trait StabilitySource: Send + Sync {
    async fn stability_stats(&self, device_id: &str, mac: &str) -> Option<StabilityStats>;
}

type PairKey = (DeviceId, Mac);

/// Monitor counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct QualityStats {
    pub monitored_pairs: usize,
    pub checks_run: u64,
    pub trends_run: u64,
    pub alerts_raised: u64,
    pub alerts_suppressed_by_cooldown: u64,
    pub failed_updates: u64,
}

/// Quality monitor component
pub struct QualityMonitor {
    config: QualityConfig,
    signal_source: Arc<dyn SignalSource>,
    stability_source: Arc<dyn StabilitySource>,
    alert_sink: Arc<dyn AlertSink>,
    pairs: Arc<RwLock<HashMap<PairKey, ConnectionMetrics>>>,
    /// Last send per (type, mac) for the alert cooldown
    cooldowns: Arc<RwLock<HashMap<(AlertType, Mac), DateTime<Utc>>>>,
    checks_run: AtomicU64,
    trends_run: AtomicU64,
    alerts_raised: AtomicU64,
    alerts_cooled: AtomicU64,
    failed_updates: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl QualityMonitor {
    pub fn new(
        config: QualityConfig,
        signal_source: Arc<dyn SignalSource>,
        stability_source: Arc<dyn StabilitySource>,
        alert_sink: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(QualityMonitor {
            config,
            signal_source,
            stability_source,
            alert_sink,
            pairs: Arc::new(RwLock::new(HashMap::new())),
            cooldowns: Arc::new(RwLock::new(HashMap::new())),
            checks_run: AtomicU64::new(0),
            trends_run: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            alerts_cooled: AtomicU64::new(0),
            failed_updates: AtomicU64::new(0),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Launch the quality-check and trend-analysis loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("quality monitor already running".to_string()));
        }
        info!("Starting quality monitor");

        {
            let monitor = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    monitor.config.quality_check_interval_secs,
                ));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => monitor.run_quality_check_once().await,
                    }
                }
            }));
        }
        {
            let monitor = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    monitor.config.trend_analysis_interval_secs,
                ));
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        _ = ticker.tick() => monitor.run_trend_analysis_once().await,
                    }
                }
            }));
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("quality monitor not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Quality monitor stopped");
        Ok(())
    }

    /// Begin monitoring a (AP, client) pair
    pub async fn monitor_connection(&self, device_id: &str, mac: &str) {
        let mut pairs = self.pairs.write().await;
        pairs
            .entry((device_id.to_string(), mac.to_string()))
            .or_insert_with(|| ConnectionMetrics::new(device_id, mac, Utc::now()));
    }

    /// Stop monitoring a pair, dropping its history
    pub async fn unmonitor_connection(&self, device_id: &str, mac: &str) {
        self.pairs
            .write()
            .await
            .remove(&(device_id.to_string(), mac.to_string()));
    }

    /// Record a passively observed latency/loss/jitter sample
    pub async fn record_performance_sample(
        &self,
        device_id: &str,
        mac: &str,
        sample: PerformanceSample,
    ) -> Result<()> {
        let mut pairs = self.pairs.write().await;
        let Some(metrics) = pairs.get_mut(&(device_id.to_string(), mac.to_string())) else {
            return Err(Error::Quality(format!(
                "pair ({device_id}, {mac}) is not monitored"
            )));
        };
        if let Some(v) = sample.latency_ms {
            metrics.performance.latency_ms = Some(v);
        }
        if let Some(v) = sample.packet_loss {
            metrics.performance.packet_loss = Some(v);
        }
        if let Some(v) = sample.jitter_ms {
            metrics.performance.jitter_ms = Some(v);
        }
        metrics.performance.last_sample = Some(Utc::now());
        Ok(())
    }

    /// One full pass of metric collection, scoring and threshold alerts
    pub async fn run_quality_check_once(&self) {
        self.checks_run.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let keys: Vec<PairKey> = self.pairs.read().await.keys().cloned().collect();

        for (device_id, mac) in keys {
            let signal = self.signal_source.signal_stats(&device_id, &mac).await;
            let counters = self.signal_source.link_counters(&device_id, &mac).await;
            let stability = self.stability_source.stability_stats(&device_id, &mac).await;

            let violation_requests = {
                let mut pairs = self.pairs.write().await;
                let Some(metrics) = pairs.get_mut(&(device_id.clone(), mac.clone())) else {
                    continue;
                };
                metrics.signal = signal;
                metrics.stability = stability;
                if let Some(counters) = counters {
                    metrics.update_counters(counters, now);
                }

                metrics.score = QualityScore::compute(
                    metrics.signal.as_ref(),
                    &metrics.performance,
                    metrics.stability.as_ref(),
                    &self.config.thresholds,
                );
                metrics.push_snapshot(
                    QualitySnapshot {
                        timestamp: now,
                        overall: metrics.score.overall,
                        signal: metrics.score.signal,
                        throughput: metrics.performance.throughput_mbps.unwrap_or(0.0),
                        latency: metrics.performance.latency_ms.unwrap_or(0.0),
                        stability: metrics.score.stability,
                    },
                    self.config.max_snapshots,
                );

                self.threshold_violations(metrics)
            };

            for request in violation_requests {
                self.raise_with_cooldown(request, now).await;
            }
        }
    }

    /// Threshold checks against the poor levels of each metric
    fn threshold_violations(&self, metrics: &ConnectionMetrics) -> Vec<AlertRequest> {
        let thresholds = &self.config.thresholds;
        let mut requests = Vec::new();
        let mut push = |alert_type: AlertType, title: &str, description: String| {
            requests.push(AlertRequest::new(
                alert_type,
                Severity::Warning,
                &metrics.device_id,
                &metrics.mac,
                title,
                &description,
            ));
        };

        if let Some(signal) = &metrics.signal {
            if signal.average_rssi < thresholds.signal_dbm.poor {
                push(
                    AlertType::WeakSignal,
                    "Signal below poor threshold",
                    format!("average RSSI {:.0} dBm", signal.average_rssi),
                );
            }
        }
        if let Some(latency) = metrics.performance.latency_ms {
            if latency > thresholds.latency_ms.poor {
                push(
                    AlertType::HighLatency,
                    "Latency above poor threshold",
                    format!("latency {latency:.0} ms"),
                );
            }
        }
        if let Some(loss) = metrics.performance.packet_loss {
            if loss > thresholds.packet_loss.poor {
                push(
                    AlertType::PacketLoss,
                    "Packet loss above poor threshold",
                    format!("loss {:.2}%", loss * 100.0),
                );
            }
        }
        if let Some(throughput) = metrics.performance.throughput_mbps {
            if throughput < thresholds.throughput_mbps.poor {
                push(
                    AlertType::LowThroughput,
                    "Throughput below poor threshold",
                    format!("throughput {throughput:.1} Mbit/s"),
                );
            }
        }
        if let Some(jitter) = metrics.performance.jitter_ms {
            if jitter > thresholds.jitter_ms.poor {
                push(
                    AlertType::HighJitter,
                    "Jitter above poor threshold",
                    format!("jitter {jitter:.1} ms"),
                );
            }
        }
        requests
    }

    /// One full pass of trend fitting and trend alerts
    pub async fn run_trend_analysis_once(&self) {
        self.trends_run.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let keys: Vec<PairKey> = self.pairs.read().await.keys().cloned().collect();

        for (device_id, mac) in keys {
            let trend_request = {
                let mut pairs = self.pairs.write().await;
                let Some(metrics) = pairs.get_mut(&(device_id.clone(), mac.clone())) else {
                    continue;
                };
                let window = self.config.trend_window_size;
                let series: Vec<f64> = metrics
                    .snapshots
                    .iter()
                    .rev()
                    .take(window)
                    .map(|s| s.overall)
                    .collect::<Vec<_>>()
                    .into_iter()
                    .rev()
                    .collect();
                let Some(trend) = TrendAnalysis::fit(&series) else {
                    continue;
                };
                debug!(
                    mac = %mac,
                    device = %device_id,
                    direction = ?trend.direction,
                    slope = trend.slope,
                    confidence = trend.confidence,
                    "Trend analyzed"
                );
                let request = self.trend_alert(metrics, &trend);
                metrics.trend = Some(trend);
                request
            };

            if let Some(request) = trend_request {
                self.raise_with_cooldown(request, now).await;
            }
        }
    }

    fn trend_alert(&self, metrics: &ConnectionMetrics, trend: &TrendAnalysis) -> Option<AlertRequest> {
        match trend.direction {
            TrendDirection::Degrading if trend.strength > self.config.performance_drop_threshold => {
                let severity = if trend.strength > 2.0 * self.config.performance_drop_threshold {
                    Severity::Error
                } else {
                    Severity::Warning
                };
                Some(
                    AlertRequest::new(
                        AlertType::QualityDegraded,
                        severity,
                        &metrics.device_id,
                        &metrics.mac,
                        "Connection quality degrading",
                        &format!(
                            "quality dropped {:.2} over {} snapshots (confidence {:.2})",
                            trend.strength, trend.sample_count, trend.confidence
                        ),
                    )
                    .with_context("slope", serde_json::json!(trend.slope))
                    .with_context("predicted", serde_json::json!(trend.predicted_quality)),
                )
            }
            TrendDirection::Volatile => Some(AlertRequest::new(
                AlertType::QualityVolatile,
                Severity::Info,
                &metrics.device_id,
                &metrics.mac,
                "Connection quality volatile",
                &format!("variance-dominated over {} snapshots", trend.sample_count),
            )),
            _ => None,
        }
    }

    /// Forward an alert unless the per-(type, MAC) cooldown holds it
    async fn raise_with_cooldown(&self, request: AlertRequest, now: DateTime<Utc>) {
        let key = (request.alert_type, request.mac.clone());
        let cooldown = Duration::seconds(self.config.alert_cooldown_secs as i64);
        {
            let cooldowns = self.cooldowns.read().await;
            if let Some(last) = cooldowns.get(&key) {
                if now - *last < cooldown {
                    self.alerts_cooled.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        match self.alert_sink.raise_alert(request).await {
            Ok(_) => {
                self.alerts_raised.fetch_add(1, Ordering::Relaxed);
                self.cooldowns.write().await.insert(key, now);
            }
            Err(Error::Suppressed(_)) => {
                // Suppression is deliberate operator state, keep quiet.
            }
            Err(e) => {
                self.failed_updates.fetch_add(1, Ordering::Relaxed);
                warn!("Alert creation failed: {}", e);
            }
        }
    }

    /// Deep copy of one pair's metrics
    pub async fn connection_metrics(&self, device_id: &str, mac: &str) -> Option<ConnectionMetrics> {
        self.pairs
            .read()
            .await
            .get(&(device_id.to_string(), mac.to_string()))
            .cloned()
    }

    /// Deep copy of every monitored pair
    pub async fn all_metrics(&self) -> Vec<ConnectionMetrics> {
        self.pairs.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> QualityStats {
        QualityStats {
            monitored_pairs: self.pairs.read().await.len(),
            checks_run: self.checks_run.load(Ordering::Relaxed),
            trends_run: self.trends_run.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            alerts_suppressed_by_cooldown: self.alerts_cooled.load(Ordering::Relaxed),
            failed_updates: self.failed_updates.load(Ordering::Relaxed),
        }
    }

    /// Replay a historical snapshot into a pair's ring
    ///
    /// Intended for backfill from the blob store and for tests.
    pub async fn record_snapshot(
        &self,
        device_id: &str,
        mac: &str,
        snapshot: QualitySnapshot,
    ) -> Result<()> {
        let mut pairs = self.pairs.write().await;
        let Some(metrics) = pairs.get_mut(&(device_id.to_string(), mac.to_string())) else {
            return Err(Error::Quality(format!(
                "pair ({device_id}, {mac}) is not monitored"
            )));
        };
        metrics.push_snapshot(snapshot, self.config.max_snapshots);
        Ok(())
    }
}
