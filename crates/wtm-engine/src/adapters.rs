//! Adapter implementations connecting components across crate seams
//!
//! Every provider trait a component consumes is implemented here over
//! the owning component's deep-copy read API.

use crate::topology::{NodeKind, TopologyGraph};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use wtm_alerting::{AlertManager, EvaluationContext, RuleContextProvider};
use wtm_anomaly::{RoamingHistoryProvider, SessionSummary, TelemetryProvider, TransitionSample};
use wtm_collector::ClientCollector;
use wtm_common::{AlertRequest, AlertSink, Mac, NetworkEvent, Result, RoamingEvent};
use wtm_quality::{LinkCounters, SignalSource, SignalStats, StabilityStats, StabilitySource};
use wtm_realtime::EventHandler;
use wtm_roaming::{InferenceEngine, RoamingDetector};
use wtm_sessions::ConnectionTracker;

/// Signal statistics and link counters sourced from the collector
pub struct CollectorSignalSource {
    pub collector: Arc<ClientCollector>,
}

#[async_trait]
impl SignalSource for CollectorSignalSource {
    async fn signal_stats(&self, device_id: &str, mac: &str) -> Option<SignalStats> {
        let history = self.collector.signal_history(mac).await;
        let on_ap: Vec<_> = history.iter().filter(|p| p.ap_id == device_id).collect();
        if on_ap.is_empty() {
            return None;
        }
        let sum: i64 = on_ap.iter().map(|p| p.rssi as i64).sum();
        let latest = on_ap.last()?;
        Some(SignalStats {
            average_rssi: sum as f64 / on_ap.len() as f64,
            latest_rssi: latest.rssi,
            noise_floor: latest.noise_floor,
            sample_count: on_ap.len(),
        })
    }

    async fn link_counters(&self, device_id: &str, mac: &str) -> Option<LinkCounters> {
        let ap = self.collector.access_point(device_id).await?;
        let info = ap.clients.get(mac)?;
        Some(LinkCounters {
            tx_bytes: info.tx_bytes,
            rx_bytes: info.rx_bytes,
            tx_packets: info.tx_packets,
            rx_packets: info.rx_packets,
        })
    }
}

/// Stability statistics sourced from the session tracker
pub struct TrackerStabilitySource {
    pub tracker: Arc<ConnectionTracker>,
}

#[async_trait]
impl StabilitySource for TrackerStabilitySource {
    async fn stability_stats(&self, _device_id: &str, mac: &str) -> Option<StabilityStats> {
        let profile = self.tracker.profile(mac).await?;
        let reliability = profile.reliability?;
        Some(StabilityStats {
            total_uptime_ms: reliability.total_uptime_ms,
            disconnect_count: reliability.disconnect_count,
            flapping: reliability.flapping,
            success_rate: reliability.connection_success_rate,
        })
    }
}

/// Alert sink backed by the alert manager
pub struct ManagerAlertSink {
    pub manager: Arc<AlertManager>,
}

#[async_trait]
impl AlertSink for ManagerAlertSink {
    async fn raise_alert(&self, request: AlertRequest) -> Result<String> {
        self.manager.create_alert(request).await.map(|alert| alert.id)
    }
}

/// Telemetry provider for the anomaly detector
pub struct EngineTelemetryProvider {
    pub collector: Arc<ClientCollector>,
    pub tracker: Arc<ConnectionTracker>,
}

#[async_trait]
impl TelemetryProvider for EngineTelemetryProvider {
    async fn clients(&self) -> Vec<Mac> {
        self.collector.clients().await.into_iter().map(|c| c.mac).collect()
    }

    async fn session_summaries(&self, mac: &str) -> Vec<SessionSummary> {
        self.tracker
            .client_history(mac)
            .await
            .into_iter()
            .map(|s| SessionSummary {
                started_at: s.started_at,
                duration_ms: s.duration_ms,
                quality_score: s.quality_score,
                device_id: s.device_id,
                hour_of_day: s.context.hour_of_day,
            })
            .collect()
    }

    async fn current_signal_quality(&self, mac: &str) -> Option<f64> {
        let history = self.collector.signal_history(mac).await;
        if history.is_empty() {
            return None;
        }
        let recent: Vec<f64> = history.iter().rev().take(10).map(|p| p.quality).collect();
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }
}

/// Roaming history provider for the anomaly detector
pub struct EngineRoamingHistory {
    pub inference: Arc<InferenceEngine>,
    pub detector: Arc<RoamingDetector>,
}

#[async_trait]
impl RoamingHistoryProvider for EngineRoamingHistory {
    async fn roaming_events(&self, mac: &str) -> Vec<RoamingEvent> {
        self.detector.roaming_events(mac).await
    }

    async fn transitions(&self, mac: &str) -> Vec<TransitionSample> {
        self.inference
            .transitions(mac)
            .await
            .into_iter()
            .map(|t| TransitionSample {
                from_ap: t.from_ap,
                to_ap: t.to_ap,
                timestamp: t.timestamp,
            })
            .collect()
    }

    async fn frequency_last_hour(&self, mac: &str) -> u32 {
        match self.detector.client_state(mac).await {
            Some(state) => state.frequency_per_hour(Utc::now()),
            None => 0,
        }
    }
}

/// Rule evaluation context assembled from component stats
pub struct StatsRuleContext {
    pub collector: Arc<ClientCollector>,
    pub tracker: Arc<ConnectionTracker>,
}

#[async_trait]
impl RuleContextProvider for StatsRuleContext {
    async fn evaluation_context(&self) -> EvaluationContext {
        let collector_stats = self.collector.stats().await;
        let session_stats = self.tracker.stats().await;
        let access_points = self.collector.access_points().await;

        let mut metrics = HashMap::new();
        metrics.insert("clients_tracked".to_string(), collector_stats.clients_tracked as f64);
        metrics.insert("access_points".to_string(), collector_stats.access_points as f64);
        metrics.insert(
            "processing_errors".to_string(),
            collector_stats.processing_errors as f64,
        );
        metrics.insert("active_sessions".to_string(), session_stats.active_sessions as f64);
        metrics.insert("session_timeouts".to_string(), session_stats.timeouts as f64);
        if !access_points.is_empty() {
            let avg_quality = access_points.iter().map(|ap| ap.quality_score).sum::<f64>()
                / access_points.len() as f64;
            metrics.insert("avg_ap_quality".to_string(), avg_quality);
            let weak_aps = access_points.iter().filter(|ap| ap.quality_score < 0.4).count();
            metrics.insert("weak_aps".to_string(), weak_aps as f64);
        }

        EvaluationContext {
            metrics,
            flags: Default::default(),
        }
    }
}

/// Handler that rebuilds the topology graph from collector state
pub struct TopologyRebuildHandler {
    pub collector: Arc<ClientCollector>,
    pub graph: Arc<RwLock<TopologyGraph>>,
}

#[async_trait]
impl EventHandler for TopologyRebuildHandler {
    async fn handle(&self, event: &NetworkEvent) -> Result<()> {
        let access_points = self.collector.access_points().await;
        let clients = self.collector.clients().await;

        let mut graph = TopologyGraph::default();
        for ap in &access_points {
            graph.add_node(&ap.device_id, NodeKind::AccessPoint, &ap.ssid);
        }
        for client in &clients {
            if client.current_ap.is_empty() {
                continue;
            }
            graph.add_node(&client.mac, NodeKind::Client, &client.friendly_name);
            let quality = client
                .signal_history
                .back()
                .map(|p| p.quality)
                .unwrap_or(0.5);
            graph.add_edge(&client.current_ap, &client.mac, quality);
        }
        debug!(
            trigger = %event.id,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "Topology graph rebuilt"
        );
        *self.graph.write().await = graph;
        Ok(())
    }
}
