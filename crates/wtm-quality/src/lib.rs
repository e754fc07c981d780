//! Connection quality monitoring
//!
//! Scores every monitored (AP, client) pair across signal,
//! performance, stability and reliability axes, keeps bounded
//! snapshot history, classifies trends with a least-squares fit and
//! raises alerts on threshold violations and degrading trends.

pub mod monitor;
pub mod score;
pub mod trend;

pub use monitor::{QualityMonitor, QualityStats, SignalSource, StabilitySource};
pub use score::{
    ConnectionMetrics, LinkCounters, PerformanceSample, PerformanceStats, QualityScore,
    QualitySnapshot, SignalStats, StabilityStats,
};
pub use trend::{TrendAnalysis, TrendDirection};
