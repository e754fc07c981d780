//! Per-client tracking state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use wtm_common::{DeviceId, Mac, SignalPoint};

/// One stretch of association with a single (AP, SSID)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApConnection {
    pub ap_id: DeviceId,
    pub ssid: String,
    pub started_at: DateTime<Utc>,
    /// Advanced on every observation while the association holds
    pub ended_at: DateTime<Utc>,
}

/// Tracking record for one client station
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub mac: Mac,
    pub friendly_name: String,
    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    pub capabilities: Vec<String>,
    /// AP the client is currently associated with; empty before the
    /// first observation
    pub current_ap: DeviceId,
    pub previous_ap: DeviceId,
    pub current_ssid: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub signal_history: VecDeque<SignalPoint>,
    pub ap_connections: VecDeque<ApConnection>,
}

impl ClientRecord {
    pub fn new(mac: Mac, now: DateTime<Utc>) -> Self {
        ClientRecord {
            friendly_name: mac.clone(),
            mac,
            ip_address: None,
            hostname: None,
            capabilities: Vec::new(),
            current_ap: String::new(),
            previous_ap: String::new(),
            current_ssid: String::new(),
            first_seen: now,
            last_seen: now,
            signal_history: VecDeque::new(),
            ap_connections: VecDeque::new(),
        }
    }

    /// Append a signal point, evicting the oldest when the ring is full
    pub fn push_signal(&mut self, point: SignalPoint, capacity: usize) {
        if self.signal_history.len() >= capacity {
            self.signal_history.pop_front();
        }
        self.signal_history.push_back(point);
    }

    /// Last observed RSSI, if any
    pub fn last_rssi(&self) -> Option<i32> {
        self.signal_history.back().map(|p| p.rssi)
    }

    /// Average of the most recent `n` RSSI samples
    pub fn recent_average_rssi(&self, n: usize) -> Option<f64> {
        if self.signal_history.len() < n || n == 0 {
            return None;
        }
        let sum: i64 = self
            .signal_history
            .iter()
            .rev()
            .take(n)
            .map(|p| p.rssi as i64)
            .sum();
        Some(sum as f64 / n as f64)
    }

    /// Record an observation against the AP connection history
    ///
    /// The last entry advances while (AP, SSID) is unchanged;
    /// otherwise it is closed and a new entry opens.
    pub fn touch_ap_connection(
        &mut self,
        ap_id: &str,
        ssid: &str,
        now: DateTime<Utc>,
        capacity: usize,
    ) {
        if let Some(last) = self.ap_connections.back_mut() {
            if last.ap_id == ap_id && last.ssid == ssid {
                last.ended_at = now;
                return;
            }
            last.ended_at = last.ended_at.min(now);
        }
        if self.ap_connections.len() >= capacity {
            self.ap_connections.pop_front();
        }
        self.ap_connections.push_back(ApConnection {
            ap_id: ap_id.to_string(),
            ssid: ssid.to_string(),
            started_at: now,
            ended_at: now,
        });
    }

    /// Drop signal points older than the retention cutoff
    pub fn prune_signal_history(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.signal_history.len();
        while matches!(self.signal_history.front(), Some(p) if p.timestamp < cutoff) {
            self.signal_history.pop_front();
        }
        before - self.signal_history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(rssi: i32, ap: &str, ts: DateTime<Utc>) -> SignalPoint {
        SignalPoint {
            timestamp: ts,
            rssi,
            noise_floor: None,
            tx_rate: None,
            rx_rate: None,
            ap_id: ap.to_string(),
            quality: SignalPoint::quality_for_rssi(rssi),
        }
    }

    #[test]
    fn signal_ring_is_bounded() {
        let now = Utc::now();
        let mut client = ClientRecord::new("aa:bb:cc:dd:ee:01".to_string(), now);
        for i in 0..10 {
            client.push_signal(point(-60 - i, "ap-1", now), 4);
        }
        assert_eq!(client.signal_history.len(), 4);
        assert_eq!(client.last_rssi(), Some(-69));
    }

    #[test]
    fn recent_average_requires_enough_samples() {
        let now = Utc::now();
        let mut client = ClientRecord::new("aa:bb:cc:dd:ee:01".to_string(), now);
        client.push_signal(point(-60, "ap-1", now), 16);
        client.push_signal(point(-70, "ap-1", now), 16);
        assert!(client.recent_average_rssi(3).is_none());
        client.push_signal(point(-80, "ap-1", now), 16);
        assert_eq!(client.recent_average_rssi(3), Some(-70.0));
    }

    #[test]
    fn ap_connection_advances_then_rolls() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(30);
        let t2 = t0 + chrono::Duration::seconds(60);
        let mut client = ClientRecord::new("aa:bb:cc:dd:ee:01".to_string(), t0);

        client.touch_ap_connection("ap-1", "corp", t0, 8);
        client.touch_ap_connection("ap-1", "corp", t1, 8);
        assert_eq!(client.ap_connections.len(), 1);
        assert_eq!(client.ap_connections.back().unwrap().ended_at, t1);

        client.touch_ap_connection("ap-2", "corp", t2, 8);
        assert_eq!(client.ap_connections.len(), 2);
        assert_eq!(client.ap_connections.front().unwrap().ap_id, "ap-1");
    }

    #[test]
    fn prune_drops_only_expired_points() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(30);
        let mut client = ClientRecord::new("aa:bb:cc:dd:ee:01".to_string(), now);
        client.push_signal(point(-60, "ap-1", old), 16);
        client.push_signal(point(-61, "ap-1", now), 16);
        let dropped = client.prune_signal_history(now - chrono::Duration::hours(24));
        assert_eq!(dropped, 1);
        assert_eq!(client.signal_history.len(), 1);
    }
}
