//! Utility functions and helpers

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

/// Normalize a MAC address to lowercase colon-separated form
///
/// Accepts `:`, `-` and `.` separators as well as bare 12-digit hex.
pub fn normalize_mac(raw: &str) -> Result<String> {
    let hex: String = raw
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidInput(format!("malformed MAC address: {raw}")));
    }

    let hex = hex.to_ascii_lowercase();
    let mut out = String::with_capacity(17);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push(chunk[0] as char);
        out.push(chunk[1] as char);
    }
    Ok(out)
}

/// Convert epoch milliseconds to a UTC timestamp
///
/// Out-of-range values fall back to now rather than failing the item.
pub fn timestamp_from_millis(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Current timestamp as milliseconds since epoch
pub fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Hour of day and weekday (Monday = 0) of a timestamp
pub fn hour_and_weekday(ts: DateTime<Utc>) -> (u8, u8) {
    (ts.hour() as u8, ts.weekday().num_days_from_monday() as u8)
}

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0.0 for fewer than two samples
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Least-squares linear fit over equally indexed samples
///
/// Returns `(slope, r_squared)` with x = 0, 1, .. n-1. Fewer than two
/// samples yield a flat fit with zero confidence.
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len();
    if n < 2 {
        return (0.0, 0.0);
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = mean(values);

    let mut ss_xy = 0.0;
    let mut ss_xx = 0.0;
    let mut ss_yy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        ss_xy += dx * dy;
        ss_xx += dx * dx;
        ss_yy += dy * dy;
    }

    if ss_xx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = ss_xy / ss_xx;
    let r_squared = if ss_yy == 0.0 {
        1.0
    } else {
        ((ss_xy * ss_xy) / (ss_xx * ss_yy)).clamp(0.0, 1.0)
    };
    (slope, r_squared)
}

/// Linear retry backoff: `base_ms * (attempt + 1)`
pub fn linear_backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(attempt as u64 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_normalization_accepts_common_forms() {
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:01").unwrap(), "aa:bb:cc:dd:ee:01");
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-01").unwrap(), "aa:bb:cc:dd:ee:01");
        assert_eq!(normalize_mac("aabb.ccdd.ee01").unwrap(), "aa:bb:cc:dd:ee:01");
        assert_eq!(normalize_mac("AABBCCDDEE01").unwrap(), "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn mac_normalization_rejects_garbage() {
        assert!(normalize_mac("").is_err());
        assert!(normalize_mac("aa:bb:cc").is_err());
        assert!(normalize_mac("zz:bb:cc:dd:ee:01").is_err());
        assert!(normalize_mac("aa:bb:cc:dd:ee:01:02").is_err());
    }

    #[test]
    fn linear_fit_recovers_slope() {
        let values = [0.9, 0.85, 0.8, 0.75, 0.7];
        let (slope, r_squared) = linear_fit(&values);
        assert!((slope + 0.05).abs() < 1e-9);
        assert!(r_squared > 0.99);
    }

    #[test]
    fn linear_fit_flat_series_is_confident() {
        let (slope, r_squared) = linear_fit(&[0.5, 0.5, 0.5, 0.5]);
        assert_eq!(slope, 0.0);
        assert_eq!(r_squared, 1.0);
    }

    #[test]
    fn std_dev_of_constant_series_is_zero() {
        assert_eq!(std_dev(&[3.0, 3.0, 3.0]), 0.0);
        assert!(std_dev(&[1.0, 2.0, 3.0]) > 0.0);
    }

    #[test]
    fn backoff_is_linear_in_attempts() {
        assert_eq!(linear_backoff_ms(1000, 0), 1000);
        assert_eq!(linear_backoff_ms(1000, 2), 3000);
    }
}
