//! Alert suppression windows

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;
use wtm_common::{AlertType, DeviceId, Mac};

/// A time-bounded suppression of matching alerts
///
/// Empty type/device/MAC sets act as wildcards. A recurring window
/// suppresses the same hours every day instead of one absolute span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSuppression {
    pub id: String,
    pub reason: String,
    pub alert_types: HashSet<AlertType>,
    pub device_ids: HashSet<DeviceId>,
    pub macs: HashSet<Mac>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Daily recurring window as (start_hour, end_hour), end exclusive
    pub recurring_hours: Option<(u8, u8)>,
    pub active: bool,
}

impl AlertSuppression {
    pub fn new(
        reason: &str,
        alert_types: impl IntoIterator<Item = AlertType>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        AlertSuppression {
            id: Uuid::new_v4().to_string(),
            reason: reason.to_string(),
            alert_types: alert_types.into_iter().collect(),
            device_ids: HashSet::new(),
            macs: HashSet::new(),
            starts_at,
            ends_at,
            recurring_hours: None,
            active: true,
        }
    }

    pub fn for_mac(mut self, mac: &str) -> Self {
        self.macs.insert(mac.to_string());
        self
    }

    pub fn for_device(mut self, device_id: &str) -> Self {
        self.device_ids.insert(device_id.to_string());
        self
    }

    pub fn recurring(mut self, start_hour: u8, end_hour: u8) -> Self {
        self.recurring_hours = Some((start_hour, end_hour));
        self
    }

    /// Whether this suppression covers the given alert right now
    pub fn matches(
        &self,
        alert_type: AlertType,
        device_id: &str,
        mac: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.active {
            return false;
        }
        if !self.in_window(now) {
            return false;
        }
        if !self.alert_types.is_empty() && !self.alert_types.contains(&alert_type) {
            return false;
        }
        if !self.device_ids.is_empty() && !self.device_ids.contains(device_id) {
            return false;
        }
        if !self.macs.is_empty() && !self.macs.contains(mac) {
            return false;
        }
        true
    }

    fn in_window(&self, now: DateTime<Utc>) -> bool {
        if let Some((start_hour, end_hour)) = self.recurring_hours {
            let hour = now.hour() as u8;
            if start_hour <= end_hour {
                return hour >= start_hour && hour < end_hour;
            }
            // Overnight window, e.g. 22..6.
            return hour >= start_hour || hour < end_hour;
        }
        now >= self.starts_at && now < self.ends_at
    }

    /// Whether the absolute window has passed
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.recurring_hours.is_none() && now >= self.ends_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wtm_common::AlertType;

    #[test]
    fn window_and_type_must_both_match() {
        let now = Utc::now();
        let suppression = AlertSuppression::new(
            "maintenance",
            [AlertType::QualityDegraded],
            now - Duration::minutes(5),
            now + Duration::hours(1),
        )
        .for_mac("aa:bb:cc:dd:ee:01");

        assert!(suppression.matches(AlertType::QualityDegraded, "ap-1", "aa:bb:cc:dd:ee:01", now));
        assert!(!suppression.matches(AlertType::WeakSignal, "ap-1", "aa:bb:cc:dd:ee:01", now));
        assert!(!suppression.matches(AlertType::QualityDegraded, "ap-1", "aa:bb:cc:dd:ee:02", now));
        assert!(!suppression.matches(
            AlertType::QualityDegraded,
            "ap-1",
            "aa:bb:cc:dd:ee:01",
            now + Duration::hours(2)
        ));
    }

    #[test]
    fn empty_sets_are_wildcards() {
        let now = Utc::now();
        let suppression =
            AlertSuppression::new("all quiet", [], now - Duration::minutes(1), now + Duration::hours(1));
        assert!(suppression.matches(AlertType::WeakSignal, "any-ap", "any-mac", now));
    }

    #[test]
    fn overnight_recurring_window_wraps() {
        let suppression = AlertSuppression::new(
            "night quiet hours",
            [],
            Utc::now() - Duration::days(365),
            Utc::now() + Duration::days(365),
        )
        .recurring(22, 6);

        let at = |hour: u32| Utc::now().date_naive().and_hms_opt(hour, 30, 0).unwrap().and_utc();
        assert!(suppression.matches(AlertType::WeakSignal, "ap", "mac", at(23)));
        assert!(suppression.matches(AlertType::WeakSignal, "ap", "mac", at(3)));
        assert!(!suppression.matches(AlertType::WeakSignal, "ap", "mac", at(12)));
    }

    #[test]
    fn inactive_suppression_never_matches() {
        let now = Utc::now();
        let mut suppression =
            AlertSuppression::new("off", [], now - Duration::minutes(1), now + Duration::hours(1));
        suppression.active = false;
        assert!(!suppression.matches(AlertType::WeakSignal, "ap", "mac", now));
    }
}
