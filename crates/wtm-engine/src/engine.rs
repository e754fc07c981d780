//! Engine lifecycle and cross-component plumbing

use crate::adapters::{
    CollectorSignalSource, EngineRoamingHistory, EngineTelemetryProvider, ManagerAlertSink,
    StatsRuleContext, TopologyRebuildHandler, TrackerStabilitySource,
};
use crate::topology::TopologyGraph;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};
use wtm_alerting::{AlertManager, AlertStats};
use wtm_anomaly::{AnomalyDetector, AnomalyStats};
use wtm_collector::{ClientCollector, CollectorStats, IngestSummary};
use wtm_common::utils::{normalize_mac, timestamp_from_millis};
use wtm_common::{
    ApChangeCandidate, ApDescriptor, BlobStore, ClientDescriptor, Config, DisconnectReason, Error,
    EventPriority, EventType, IdentityProvider, NetworkEvent, Result,
};
use wtm_quality::{QualityMonitor, QualityStats};
use wtm_realtime::{RealtimeStats, RealtimeUpdater, WebhookDelivery};
use wtm_roaming::{InferenceDecision, InferenceEngine, RoamingDetector, RoamingStats};
use wtm_sessions::{ConnectionTracker, SessionStats};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Aggregated stats across all components
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub collector: CollectorStats,
    pub sessions: SessionStats,
    pub roaming: RoamingStats,
    pub quality: QualityStats,
    pub anomaly: AnomalyStats,
    pub alerts: AlertStats,
    pub realtime: RealtimeStats,
}

/// The assembled monitoring core
pub struct Engine {
    config: Config,
    collector: Arc<ClientCollector>,
    tracker: Arc<ConnectionTracker>,
    inference: Arc<InferenceEngine>,
    detector: Arc<RoamingDetector>,
    quality: Arc<QualityMonitor>,
    anomaly: Arc<AnomalyDetector>,
    alerts: Arc<AlertManager>,
    updater: Arc<RealtimeUpdater>,
    topology: Arc<RwLock<TopologyGraph>>,
    candidate_rx: Mutex<Option<mpsc::Receiver<ApChangeCandidate>>>,
    event_rx: Mutex<Option<mpsc::Receiver<NetworkEvent>>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Engine {
    /// Construct and wire all components
    pub async fn new(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        store: Option<Arc<dyn BlobStore>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        info!("Initializing topology monitor engine");

        let (collector, candidate_rx) = ClientCollector::new(config.collector.clone(), identity);
        let tracker = ConnectionTracker::new(config.sessions.clone());
        let inference = Arc::new(InferenceEngine::new(config.roaming.clone()));
        let detector = RoamingDetector::new(config.roaming.clone());
        let alerts = AlertManager::new(config.alerting.clone());
        let updater = RealtimeUpdater::new(config.realtime.clone());

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        collector.set_event_sender(event_tx.clone()).await;
        alerts.set_event_sender(event_tx.clone()).await;

        let alert_sink = Arc::new(ManagerAlertSink {
            manager: alerts.clone(),
        });
        let quality = QualityMonitor::new(
            config.quality.clone(),
            Arc::new(CollectorSignalSource {
                collector: collector.clone(),
            }),
            Arc::new(TrackerStabilitySource {
                tracker: tracker.clone(),
            }),
            alert_sink.clone(),
        );
        let anomaly = AnomalyDetector::new(
            config.anomaly.clone(),
            Arc::new(EngineTelemetryProvider {
                collector: collector.clone(),
                tracker: tracker.clone(),
            }),
            Arc::new(EngineRoamingHistory {
                inference: inference.clone(),
                detector: detector.clone(),
            }),
            alert_sink,
        );
        anomaly.set_event_sender(event_tx).await;

        if let Some(store) = store {
            tracker.set_store(store.clone()).await;
            anomaly.set_store(store.clone()).await;
            alerts.set_store(store).await;
        }

        alerts
            .set_rule_context(Arc::new(StatsRuleContext {
                collector: collector.clone(),
                tracker: tracker.clone(),
            }))
            .await;

        let topology = Arc::new(RwLock::new(TopologyGraph::default()));
        let rebuild = Arc::new(TopologyRebuildHandler {
            collector: collector.clone(),
            graph: topology.clone(),
        });
        for event_type in [
            EventType::TopologyChanged,
            EventType::ConnectionAdded,
            EventType::ConnectionRemoved,
            EventType::DeviceOnline,
            EventType::DeviceOffline,
        ] {
            updater.register_handler(event_type, rebuild.clone()).await;
        }
        if let Ok(webhook) = WebhookDelivery::new(std::time::Duration::from_secs(
            config.alerting.notification_timeout_secs,
        )) {
            updater.register_transport(Arc::new(webhook)).await;
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Engine {
            config,
            collector,
            tracker,
            inference,
            detector,
            quality,
            anomaly,
            alerts,
            updater,
            topology,
            candidate_rx: Mutex::new(Some(candidate_rx)),
            event_rx: Mutex::new(Some(event_rx)),
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }))
    }

    /// Launch every component's background loops and the engine's
    /// own pump tasks, returning immediately
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Lifecycle("engine already running".to_string()));
        }
        info!("Starting topology monitor engine");

        self.collector.start().await?;
        self.tracker.start().await?;
        self.detector
            .start(self.config.collector.roaming_history_retention_secs)
            .await?;
        self.quality.start().await?;
        self.anomaly.start().await?;
        self.alerts.start().await?;
        self.updater.start().await?;

        let mut handles = self.handles.lock().await;

        // Candidate pump: C1 to C3 to C4, in per-client arrival order.
        if let Some(mut candidate_rx) = self.candidate_rx.lock().await.take() {
            let engine = self.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        candidate = candidate_rx.recv() => {
                            let Some(candidate) = candidate else { return };
                            engine.handle_candidate(candidate).await;
                        }
                    }
                }
            }));
        }

        // Event forwarder: component events onto the realtime bus.
        if let Some(mut event_rx) = self.event_rx.lock().await.take() {
            let updater = self.updater.clone();
            let mut shutdown = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        event = event_rx.recv() => {
                            let Some(event) = event else { return };
                            if let Err(e) = updater.publish_update(event).await {
                                warn!("Event publication dropped: {}", e);
                            }
                        }
                    }
                }
            }));
        }

        info!("Engine started");
        Ok(())
    }

    /// Signal shutdown and wait for all loops to observe it
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(Error::Lifecycle("engine not running".to_string()));
        }
        info!("Stopping topology monitor engine");

        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.lock().await.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);

        self.updater.stop().await?;
        self.alerts.stop().await?;
        self.anomaly.stop().await?;
        self.quality.stop().await?;
        self.detector.stop().await?;
        self.tracker.stop().await?;
        self.collector.stop().await?;

        info!("Engine stopped");
        Ok(())
    }

    /// Ingest one per-AP telemetry batch
    ///
    /// Drives the collector, opens or advances sessions for every
    /// valid descriptor, and registers the pairs for quality
    /// monitoring.
    pub async fn process_wifi_clients(
        &self,
        device_id: &str,
        iface: &str,
        ap: &ApDescriptor,
        clients: &[ClientDescriptor],
        timestamp_ms: u64,
    ) -> Result<IngestSummary> {
        let summary = self
            .collector
            .process_wifi_clients(device_id, iface, ap, clients, timestamp_ms)
            .await?;

        let ts = timestamp_from_millis(timestamp_ms);
        for descriptor in clients {
            let Ok(mac) = normalize_mac(&descriptor.mac_address) else {
                continue;
            };
            if descriptor.effective_rssi().is_none() {
                continue;
            }
            if let Err(e) = self
                .tracker
                .track_connection(&mac, device_id, &ap.ssid, iface, ts)
                .await
            {
                debug!("Session tracking skipped for {mac}: {e}");
                continue;
            }
            self.quality.monitor_connection(device_id, &mac).await;
        }
        Ok(summary)
    }

    /// One AP-change candidate through inference and classification
    async fn handle_candidate(&self, candidate: ApChangeCandidate) {
        // The change itself ends the session on the old AP whether or
        // not a roam is confirmed.
        if let Err(e) = self
            .tracker
            .track_disconnection(
                &candidate.client_mac,
                &candidate.from_ap,
                DisconnectReason::Roamed,
                candidate.timestamp,
            )
            .await
        {
            debug!("Roam disconnect bookkeeping failed: {e}");
        }

        let network_load = match self.collector.access_point(&candidate.to_ap).await {
            Some(ap) => ap.utilization(),
            None => 0.0,
        };
        let client_count = self.collector.stats().await.clients_tracked;

        let decision = self
            .inference
            .evaluate(&candidate, network_load, client_count)
            .await;
        let InferenceDecision::Confirmed(event) = decision else {
            return;
        };
        let classified = self.detector.classify(event).await;

        let priority = if classified.anomalous {
            EventPriority::High
        } else {
            EventPriority::Normal
        };
        let event = NetworkEvent::new(EventType::RoamingDetected, "roaming", &classified.to_ap)
            .with_priority(priority)
            .with_reason(classified.trigger.as_str())
            .with_metadata("mac", serde_json::Value::String(classified.client_mac.clone()))
            .with_metadata("from_ap", serde_json::Value::String(classified.from_ap.clone()))
            .with_metadata("to_ap", serde_json::Value::String(classified.to_ap.clone()))
            .with_metadata("confidence", serde_json::json!(classified.confidence));
        if let Err(e) = self.updater.publish_update(event).await {
            warn!("Roaming event publication dropped: {}", e);
        }
    }

    pub fn collector(&self) -> Arc<ClientCollector> {
        self.collector.clone()
    }

    pub fn tracker(&self) -> Arc<ConnectionTracker> {
        self.tracker.clone()
    }

    pub fn inference(&self) -> Arc<InferenceEngine> {
        self.inference.clone()
    }

    pub fn roaming_detector(&self) -> Arc<RoamingDetector> {
        self.detector.clone()
    }

    pub fn quality(&self) -> Arc<QualityMonitor> {
        self.quality.clone()
    }

    pub fn anomaly(&self) -> Arc<AnomalyDetector> {
        self.anomaly.clone()
    }

    pub fn alerts(&self) -> Arc<AlertManager> {
        self.alerts.clone()
    }

    pub fn updater(&self) -> Arc<RealtimeUpdater> {
        self.updater.clone()
    }

    /// Deep copy of the current topology graph
    pub async fn topology_graph(&self) -> TopologyGraph {
        self.topology.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            collector: self.collector.stats().await,
            sessions: self.tracker.stats().await,
            roaming: self.detector.stats().await,
            quality: self.quality.stats().await,
            anomaly: self.anomaly.stats().await,
            alerts: self.alerts.stats().await,
            realtime: self.updater.stats().await,
        }
    }
}
