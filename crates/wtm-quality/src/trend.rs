//! Quality trend classification

use serde::{Deserialize, Serialize};
use wtm_common::utils::{linear_fit, mean};

/// Direction of a quality trend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
    Volatile,
}

/// Result of a least-squares fit over recent snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub direction: TrendDirection,
    /// Quality units per snapshot
    pub slope: f64,
    /// R-squared of the fit, clamped to [0, 1]
    pub confidence: f64,
    /// Cumulative change the slope implies across the window
    pub strength: f64,
    /// Last value projected five snapshots ahead
    pub predicted_quality: f64,
    pub sample_count: usize,
}

impl TrendAnalysis {
    /// Fit the overall-quality series, oldest first
    ///
    /// Slope above 0.01 reads improving, below -0.01 degrading, else
    /// stable; sample variance above 0.05 overrides to volatile.
    pub fn fit(values: &[f64]) -> Option<Self> {
        if values.len() < 2 {
            return None;
        }

        let (slope, r_squared) = linear_fit(values);
        let m = mean(values);
        let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;

        let direction = if variance > 0.05 {
            TrendDirection::Volatile
        } else if slope > 0.01 {
            TrendDirection::Improving
        } else if slope < -0.01 {
            TrendDirection::Degrading
        } else {
            TrendDirection::Stable
        };

        let last = *values.last()?;
        Some(TrendAnalysis {
            direction,
            slope,
            confidence: r_squared.clamp(0.0, 1.0),
            strength: (slope * (values.len() as f64 - 1.0)).abs(),
            predicted_quality: (last + slope * 5.0).clamp(0.0, 1.0),
            sample_count: values.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_decline_reads_degrading() {
        let trend = TrendAnalysis::fit(&[0.9, 0.85, 0.8, 0.75, 0.7]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Degrading);
        assert!((trend.slope + 0.05).abs() < 1e-9);
        assert!(trend.confidence > 0.9);
        assert!((trend.strength - 0.2).abs() < 1e-9);
        assert!((trend.predicted_quality - 0.45).abs() < 1e-9);
    }

    #[test]
    fn steady_rise_reads_improving() {
        let trend = TrendAnalysis::fit(&[0.4, 0.5, 0.6, 0.7]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Improving);
        assert!(trend.slope > 0.05);
    }

    #[test]
    fn flat_series_reads_stable() {
        let trend = TrendAnalysis::fit(&[0.7, 0.702, 0.698, 0.7]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn wild_swings_override_to_volatile() {
        let trend = TrendAnalysis::fit(&[0.9, 0.2, 0.8, 0.1, 0.85]).unwrap();
        assert_eq!(trend.direction, TrendDirection::Volatile);
    }

    #[test]
    fn too_few_samples_yield_no_trend() {
        assert!(TrendAnalysis::fit(&[0.5]).is_none());
        assert!(TrendAnalysis::fit(&[]).is_none());
    }

    #[test]
    fn prediction_is_clamped() {
        let trend = TrendAnalysis::fit(&[0.2, 0.1, 0.05, 0.01]).unwrap();
        assert!(trend.predicted_quality >= 0.0);
    }
}
