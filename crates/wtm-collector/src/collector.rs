//! Telemetry ingest and background scans

use crate::client_state::ClientRecord;
use crate::roster::AccessPointState;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use wtm_common::utils::{normalize_mac, timestamp_from_millis};
use wtm_common::{
    ApChangeCandidate, ApDescriptor, ClientDescriptor, CollectorConfig, DeviceId, Error,
    EventPriority, EventType, IdentityProvider, Mac, NetworkEvent, Result, SignalPoint,
};

const CANDIDATE_CHANNEL_SIZE: usize = 256;

/// Outcome of one ingest call
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub processed: usize,
    pub failed: usize,
    pub candidates_emitted: usize,
}

/// Collector counters exposed through stats
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    pub clients_tracked: usize,
    pub access_points: usize,
    pub ingest_calls: u64,
    pub processing_errors: u64,
    pub candidates_emitted: u64,
    pub candidates_dropped: u64,
    pub weak_signal_hits: u64,
    pub last_ingest: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct CollectorState {
    clients: HashMap<Mac, ClientRecord>,
    access_points: HashMap<DeviceId, AccessPointState>,
}

#[derive(Default)]
struct Counters {
    ingest_calls: AtomicU64,
    processing_errors: AtomicU64,
    candidates_emitted: AtomicU64,
    candidates_dropped: AtomicU64,
    weak_signal_hits: AtomicU64,
}

/// Client collector component
///
/// Single writer per client under the state lock; candidates flow to
/// the roaming pipeline over a bounded channel in arrival order.
pub struct ClientCollector {
    config: CollectorConfig,
    state: Arc<RwLock<CollectorState>>,
    identity: Arc<dyn IdentityProvider>,
    identity_degraded: AtomicBool,
    candidate_tx: mpsc::Sender<ApChangeCandidate>,
    event_tx: RwLock<Option<mpsc::Sender<NetworkEvent>>>,
    counters: Counters,
    last_ingest: RwLock<Option<DateTime<Utc>>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ClientCollector {
    /// Create a collector and the receiving end of its candidate stream
    pub fn new(
        config: CollectorConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> (Arc<Self>, mpsc::Receiver<ApChangeCandidate>) {
        let (candidate_tx, candidate_rx) = mpsc::channel(CANDIDATE_CHANNEL_SIZE);
        let (shutdown_tx, _) = watch::channel(false);
        let collector = Arc::new(ClientCollector {
            config,
            state: Arc::new(RwLock::new(CollectorState::default())),
            identity,
            identity_degraded: AtomicBool::new(false),
            candidate_tx,
            event_tx: RwLock::new(None),
            counters: Counters::default(),
            last_ingest: RwLock::new(None),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        });
        (collector, candidate_rx)
    }

    /// Attach a sender for device/connection lifecycle events
    pub async fn set_event_sender(&self, tx: mpsc::Sender<NetworkEvent>) {
        *self.event_tx.write().await = Some(tx);
    }

    /// Launch the background scan loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Lifecycle("collector already running".to_string()));
        }
        info!("Starting client collector");

        handles.push(self.clone().spawn_weak_signal_scan());
        handles.push(self.clone().spawn_ap_quality_scan());
        handles.push(self.clone().spawn_cleanup());
        Ok(())
    }

    /// Signal shutdown and wait for the loops to observe it
    pub async fn stop(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if handles.is_empty() {
            return Err(Error::Lifecycle("collector not running".to_string()));
        }
        let _ = self.shutdown_tx.send(true);
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        let _ = self.shutdown_tx.send(false);
        info!("Client collector stopped");
        Ok(())
    }

    /// Ingest one per-AP telemetry batch
    ///
    /// Malformed descriptors fail individually and are counted; the
    /// batch itself always succeeds.
    pub async fn process_wifi_clients(
        &self,
        device_id: &str,
        _iface: &str,
        ap: &ApDescriptor,
        clients: &[ClientDescriptor],
        timestamp_ms: u64,
    ) -> Result<IngestSummary> {
        if device_id.is_empty() {
            return Err(Error::InvalidInput("empty AP device id".to_string()));
        }

        let now = timestamp_from_millis(timestamp_ms);
        let mut summary = IngestSummary::default();
        self.counters.ingest_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_ingest.write().await = Some(now);

        let mut candidates = Vec::new();
        let mut new_clients = Vec::new();
        {
            let mut state = self.state.write().await;
            let ap_state = state
                .access_points
                .entry(device_id.to_string())
                .or_insert_with(|| AccessPointState::new(device_id, ap, now));
            ap_state.refresh(ap, now);

            for descriptor in clients {
                match self.apply_descriptor(&mut state, device_id, ap, descriptor, now) {
                    Ok(outcome) => {
                        summary.processed += 1;
                        if let Some(candidate) = outcome.candidate {
                            candidates.push(candidate);
                        }
                        if let Some(mac) = outcome.first_seen {
                            new_clients.push(mac);
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        self.counters.processing_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Skipping client descriptor: {}", e);
                    }
                }
            }
        }

        for candidate in candidates {
            match self.candidate_tx.try_send(candidate) {
                Ok(()) => {
                    summary.candidates_emitted += 1;
                    self.counters.candidates_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.counters.candidates_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("AP-change candidate channel full, dropping candidate");
                }
            }
        }

        for mac in new_clients {
            self.resolve_friendly_name(&mac).await;
            self.emit_event(
                NetworkEvent::new(EventType::ConnectionAdded, "collector", device_id)
                    .with_reason("client first observed")
                    .with_metadata("mac", serde_json::Value::String(mac)),
            )
            .await;
        }

        Ok(summary)
    }

    fn apply_descriptor(
        &self,
        state: &mut CollectorState,
        device_id: &str,
        ap: &ApDescriptor,
        descriptor: &ClientDescriptor,
        now: DateTime<Utc>,
    ) -> Result<DescriptorOutcome> {
        let mac = normalize_mac(&descriptor.mac_address)?;
        let rssi = descriptor
            .effective_rssi()
            .ok_or_else(|| Error::InvalidInput(format!("descriptor for {mac} carries no RSSI")))?;

        let mut outcome = DescriptorOutcome::default();
        let client = state.clients.entry(mac.clone()).or_insert_with(|| {
            outcome.first_seen = Some(mac.clone());
            ClientRecord::new(mac.clone(), now)
        });

        // AP transition check precedes the new sample so prior_rssi is
        // the last reading on the old AP.
        if !client.current_ap.is_empty() && client.current_ap != device_id {
            outcome.candidate = Some(ApChangeCandidate {
                client_mac: mac.clone(),
                from_ap: client.current_ap.clone(),
                to_ap: device_id.to_string(),
                from_ssid: client.current_ssid.clone(),
                to_ssid: ap.ssid.clone(),
                prior_rssi: client.last_rssi().unwrap_or(rssi),
                current_rssi: rssi,
                connected_since: client
                    .ap_connections
                    .back()
                    .map(|c| c.started_at)
                    .unwrap_or(now),
                timestamp: now,
            });
            client.previous_ap = std::mem::replace(&mut client.current_ap, device_id.to_string());
        } else if client.current_ap.is_empty() {
            client.current_ap = device_id.to_string();
        }
        client.current_ssid = ap.ssid.clone();
        client.last_seen = now;
        if let Some(ip) = &descriptor.ip_address {
            client.ip_address = Some(ip.clone());
        }
        if let Some(hostname) = &descriptor.hostname {
            client.hostname = Some(hostname.clone());
        }
        if !descriptor.capabilities.is_empty() {
            client.capabilities = descriptor.capabilities.clone();
        }

        client.push_signal(
            SignalPoint {
                timestamp: now,
                rssi,
                noise_floor: descriptor.noise_level,
                tx_rate: descriptor.tx_rate,
                rx_rate: descriptor.rx_rate,
                ap_id: device_id.to_string(),
                quality: SignalPoint::quality_for_rssi(rssi),
            },
            self.config.max_signal_samples,
        );
        client.touch_ap_connection(device_id, &ap.ssid, now, self.config.max_ap_connections);

        if let Some(ap_state) = state.access_points.get_mut(device_id) {
            ap_state.upsert_client(&mac, descriptor, rssi, now);
        }

        Ok(outcome)
    }

    async fn resolve_friendly_name(&self, mac: &str) {
        match self.identity.device_identity(mac).await {
            Ok(Some(identity)) if !identity.friendly_name.is_empty() => {
                if self.identity_degraded.swap(false, Ordering::Relaxed) {
                    info!("Identity collaborator recovered");
                }
                let mut state = self.state.write().await;
                if let Some(client) = state.clients.get_mut(mac) {
                    client.friendly_name = identity.friendly_name;
                }
            }
            Ok(_) => {
                debug!("No identity record for {}", mac);
            }
            Err(e) => {
                if !self.identity_degraded.swap(true, Ordering::Relaxed) {
                    warn!("Identity collaborator unavailable, using MACs as names: {}", e);
                }
            }
        }
    }

    async fn emit_event(&self, event: NetworkEvent) {
        if let Some(tx) = self.event_tx.read().await.as_ref() {
            let _ = tx.try_send(event);
        }
    }

    fn spawn_weak_signal_scan(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                interval(std::time::Duration::from_secs(self.config.signal_sample_interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => self.weak_signal_scan().await,
                }
            }
        })
    }

    async fn weak_signal_scan(&self) {
        let threshold = self.config.weak_signal_threshold_dbm as f64;
        let state = self.state.read().await;
        for client in state.clients.values() {
            if let Some(average) = client.recent_average_rssi(3) {
                if average < threshold {
                    self.counters.weak_signal_hits.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        mac = %client.mac,
                        ap = %client.current_ap,
                        average_rssi = average,
                        "Client signal below weak-signal threshold"
                    );
                }
            }
        }
    }

    fn spawn_ap_quality_scan(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                interval(std::time::Duration::from_secs(self.config.quality_check_interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => {
                        let mut state = self.state.write().await;
                        for ap in state.access_points.values_mut() {
                            ap.recompute_quality();
                        }
                    }
                }
            }
        })
    }

    fn spawn_cleanup(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker =
                interval(std::time::Duration::from_secs(self.config.cleanup_interval_secs));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = ticker.tick() => self.cleanup_sweep().await,
                }
            }
        })
    }

    async fn cleanup_sweep(&self) {
        let now = Utc::now();
        let signal_cutoff = now - Duration::seconds(self.config.signal_history_retention_secs as i64);
        let offline_cutoff = now - Duration::seconds(self.config.client_offline_timeout_secs as i64);

        let mut offline = Vec::new();
        {
            let mut state = self.state.write().await;
            let mut pruned = 0usize;
            for client in state.clients.values_mut() {
                pruned += client.prune_signal_history(signal_cutoff);
            }
            for ap in state.access_points.values_mut() {
                for mac in ap.evict_stale_clients(offline_cutoff) {
                    offline.push((ap.device_id.clone(), mac));
                }
            }
            if pruned > 0 || !offline.is_empty() {
                debug!(
                    pruned_points = pruned,
                    offline_clients = offline.len(),
                    "Cleanup sweep finished"
                );
            }
        }

        for (device_id, mac) in offline {
            self.emit_event(
                NetworkEvent::new(EventType::ConnectionRemoved, "collector", &device_id)
                    .with_priority(EventPriority::Low)
                    .with_reason("client idle past offline timeout")
                    .with_metadata("mac", serde_json::Value::String(mac)),
            )
            .await;
        }
    }

    /// Deep copy of one client record
    pub async fn client(&self, mac: &str) -> Option<ClientRecord> {
        self.state.read().await.clients.get(mac).cloned()
    }

    /// Deep copy of all client records
    pub async fn clients(&self) -> Vec<ClientRecord> {
        self.state.read().await.clients.values().cloned().collect()
    }

    /// Deep copy of one AP state
    pub async fn access_point(&self, device_id: &str) -> Option<AccessPointState> {
        self.state.read().await.access_points.get(device_id).cloned()
    }

    /// Deep copy of all AP states
    pub async fn access_points(&self) -> Vec<AccessPointState> {
        self.state.read().await.access_points.values().cloned().collect()
    }

    /// Signal history for a client, oldest first
    pub async fn signal_history(&self, mac: &str) -> Vec<SignalPoint> {
        self.state
            .read()
            .await
            .clients
            .get(mac)
            .map(|c| c.signal_history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> CollectorStats {
        let state = self.state.read().await;
        CollectorStats {
            clients_tracked: state.clients.len(),
            access_points: state.access_points.len(),
            ingest_calls: self.counters.ingest_calls.load(Ordering::Relaxed),
            processing_errors: self.counters.processing_errors.load(Ordering::Relaxed),
            candidates_emitted: self.counters.candidates_emitted.load(Ordering::Relaxed),
            candidates_dropped: self.counters.candidates_dropped.load(Ordering::Relaxed),
            weak_signal_hits: self.counters.weak_signal_hits.load(Ordering::Relaxed),
            last_ingest: *self.last_ingest.read().await,
        }
    }
}

#[derive(Default)]
struct DescriptorOutcome {
    candidate: Option<ApChangeCandidate>,
    first_seen: Option<Mac>,
}
