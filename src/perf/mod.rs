pub mod analysis;
pub mod anomaly;
pub mod process;
pub mod timestamp;
pub mod tracker;

pub use anomaly::{AnomalyConfig, AnomalyDetector};
pub use tracker::PerformanceTracker;

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
