//! Per-AP client rosters and quality scoring

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use wtm_common::{ApDescriptor, ClientDescriptor, DeviceId, Mac};

/// Roster entry for one client connected to an AP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApClientInfo {
    pub mac: Mac,
    pub rssi: i32,
    pub tx_rate: Option<u64>,
    pub rx_rate: Option<u64>,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub last_seen: DateTime<Utc>,
}

/// Tracking state for one access point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPointState {
    pub device_id: DeviceId,
    pub ssid: String,
    pub bssid: String,
    pub channel: u32,
    pub band: String,
    pub max_clients: u32,
    pub clients: HashMap<Mac, ApClientInfo>,
    pub average_rssi: f64,
    /// Quality score in [0, 1] recomputed by the AP quality scan
    pub quality_score: f64,
    pub last_update: DateTime<Utc>,
}

impl AccessPointState {
    pub fn new(device_id: &str, descriptor: &ApDescriptor, now: DateTime<Utc>) -> Self {
        AccessPointState {
            device_id: device_id.to_string(),
            ssid: descriptor.ssid.clone(),
            bssid: descriptor.bssid.clone(),
            channel: descriptor.channel,
            band: descriptor.band.clone(),
            max_clients: descriptor.max_clients,
            clients: HashMap::new(),
            average_rssi: 0.0,
            quality_score: 1.0,
            last_update: now,
        }
    }

    /// Refresh AP attributes from a newer descriptor
    pub fn refresh(&mut self, descriptor: &ApDescriptor, now: DateTime<Utc>) {
        self.ssid = descriptor.ssid.clone();
        self.bssid = descriptor.bssid.clone();
        self.channel = descriptor.channel;
        self.band = descriptor.band.clone();
        self.max_clients = descriptor.max_clients;
        self.last_update = now;
    }

    /// Update the roster entry for one observed client
    pub fn upsert_client(
        &mut self,
        mac: &str,
        descriptor: &ClientDescriptor,
        rssi: i32,
        now: DateTime<Utc>,
    ) {
        let entry = self.clients.entry(mac.to_string()).or_insert(ApClientInfo {
            mac: mac.to_string(),
            rssi,
            tx_rate: None,
            rx_rate: None,
            tx_bytes: 0,
            rx_bytes: 0,
            tx_packets: 0,
            rx_packets: 0,
            last_seen: now,
        });
        entry.rssi = rssi;
        entry.tx_rate = descriptor.tx_rate;
        entry.rx_rate = descriptor.rx_rate;
        if let Some(v) = descriptor.tx_bytes {
            entry.tx_bytes = v;
        }
        if let Some(v) = descriptor.rx_bytes {
            entry.rx_bytes = v;
        }
        if let Some(v) = descriptor.tx_packets {
            entry.tx_packets = v;
        }
        if let Some(v) = descriptor.rx_packets {
            entry.rx_packets = v;
        }
        entry.last_seen = now;
    }

    /// Estimated channel utilization from roster occupancy
    pub fn utilization(&self) -> f64 {
        if self.max_clients == 0 {
            return 0.0;
        }
        (self.clients.len() as f64 / self.max_clients as f64).min(1.0)
    }

    /// Recompute average RSSI and the 0-1 quality score
    ///
    /// Penalties: weak average signal, roster occupancy near capacity,
    /// estimated channel utilization.
    pub fn recompute_quality(&mut self) {
        if self.clients.is_empty() {
            self.average_rssi = 0.0;
            self.quality_score = 1.0;
            return;
        }

        let sum: i64 = self.clients.values().map(|c| c.rssi as i64).sum();
        self.average_rssi = sum as f64 / self.clients.len() as f64;

        let mut score = 1.0;
        if self.average_rssi < -75.0 {
            score -= 0.4;
        } else if self.average_rssi < -65.0 {
            score -= 0.2;
        }

        let utilization = self.utilization();
        if utilization > 0.9 {
            score -= 0.3;
        } else if utilization > 0.7 {
            score -= 0.15;
        }
        score -= utilization * 0.1;

        self.quality_score = score.clamp(0.0, 1.0);
    }

    /// Drop roster entries idle past the cutoff, returning their MACs
    pub fn evict_stale_clients(&mut self, cutoff: DateTime<Utc>) -> Vec<Mac> {
        let stale: Vec<Mac> = self
            .clients
            .values()
            .filter(|c| c.last_seen < cutoff)
            .map(|c| c.mac.clone())
            .collect();
        for mac in &stale {
            self.clients.remove(mac);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ApDescriptor {
        ApDescriptor {
            ssid: "corp".to_string(),
            bssid: "00:11:22:33:44:55".to_string(),
            channel: 36,
            band: "5g".to_string(),
            max_clients: 10,
        }
    }

    fn client_descriptor(tx_bytes: u64) -> ClientDescriptor {
        ClientDescriptor {
            mac_address: "aa:bb:cc:dd:ee:01".to_string(),
            tx_bytes: Some(tx_bytes),
            ..ClientDescriptor::default()
        }
    }

    #[test]
    fn quality_degrades_with_weak_signal() {
        let now = Utc::now();
        let mut ap = AccessPointState::new("ap-1", &descriptor(), now);
        ap.upsert_client("aa:bb:cc:dd:ee:01", &client_descriptor(10), -80, now);
        ap.recompute_quality();
        assert_eq!(ap.average_rssi, -80.0);
        assert!(ap.quality_score < 0.7);
    }

    #[test]
    fn quality_degrades_near_capacity() {
        let now = Utc::now();
        let mut ap = AccessPointState::new("ap-1", &descriptor(), now);
        for i in 0..10 {
            let mac = format!("aa:bb:cc:dd:ee:{i:02x}");
            ap.upsert_client(&mac, &ClientDescriptor::default(), -55, now);
        }
        ap.recompute_quality();
        assert!(ap.utilization() >= 0.99);
        assert!(ap.quality_score < 0.7);
    }

    #[test]
    fn counters_overwrite_with_latest_observation() {
        let now = Utc::now();
        let mut ap = AccessPointState::new("ap-1", &descriptor(), now);
        ap.upsert_client("aa:bb:cc:dd:ee:01", &client_descriptor(100), -60, now);
        ap.upsert_client("aa:bb:cc:dd:ee:01", &client_descriptor(250), -58, now);
        let info = ap.clients.get("aa:bb:cc:dd:ee:01").unwrap();
        assert_eq!(info.tx_bytes, 250);
        assert_eq!(info.rssi, -58);
        assert_eq!(ap.clients.len(), 1);
    }

    #[test]
    fn stale_clients_are_evicted() {
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(20);
        let mut ap = AccessPointState::new("ap-1", &descriptor(), now);
        ap.upsert_client("aa:bb:cc:dd:ee:01", &ClientDescriptor::default(), -60, old);
        ap.upsert_client("aa:bb:cc:dd:ee:02", &ClientDescriptor::default(), -61, now);
        let evicted = ap.evict_stale_clients(now - chrono::Duration::minutes(5));
        assert_eq!(evicted, vec!["aa:bb:cc:dd:ee:01".to_string()]);
        assert_eq!(ap.clients.len(), 1);
    }
}
