//! Sliding-window anomaly detection over the performance store.
//!
//! For every module and metric with enough history, the newest value is
//! compared against the mean of the last `lookback` values. A relative
//! deviation above `threshold` is an anomaly. Flagged anomalies are appended to
//! `anomalies.log` and followed up until their metric settles again.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};

use super::mean;
use super::tracker::{MetricKind, PerformanceDoc, PerformanceTracker};
use crate::files;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyConfig {
    /// Relative deviation that flags an anomaly (0.25 = 25%)
    pub threshold: f64,
    /// Values averaged into the baseline
    pub lookback: usize,
    /// Consecutive in-threshold runs needed to call an anomaly recovered
    pub recovery_runs: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            threshold: 0.25,
            lookback: 5,
            recovery_runs: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub metric: MetricKind,
    pub current_value: f64,
    pub baseline_avg: f64,
    pub deviation: f64,
    pub deviation_percent: f64,
    pub threshold_percent: f64,
}

impl Anomaly {
    pub fn log_line(&self) -> String {
        format!(
            "{} | {} | {} | Current: {:.3} | Baseline: {:.3} | Deviation: {:.2}% | Threshold: {:.2}%",
            self.timestamp.to_rfc3339(),
            self.module,
            self.metric,
            self.current_value,
            self.baseline_avg,
            self.deviation_percent,
            self.threshold_percent
        )
    }
}

/// Relative deviation of `current` from `baseline`, or `None` when the
/// baseline is not positive.
fn relative_deviation(current: f64, baseline: f64) -> Option<f64> {
    (baseline > 0.0).then(|| (current - baseline).abs() / baseline)
}

/// Newest-value-vs-baseline check for one series. The baseline window is the
/// last `lookback` values, which includes the newest one; at least
/// `lookback + 1` values are required.
pub fn check_series(values: &[f64], config: &AnomalyConfig) -> Option<(f64, f64, f64)> {
    if config.lookback == 0 || values.len() < config.lookback + 1 {
        return None;
    }
    let window = &values[values.len() - config.lookback..];
    let baseline = mean(window)?;
    let current = *values.last()?;
    let deviation = relative_deviation(current, baseline)?;
    (deviation > config.threshold).then_some((current, baseline, deviation))
}

/// All anomalies currently visible in `doc`, ordered by module then metric.
pub fn detect(doc: &PerformanceDoc, config: &AnomalyConfig, now: DateTime<Utc>) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();
    for (module, metrics) in &doc.modules {
        for kind in MetricKind::ALL {
            if let Some((current, baseline, deviation)) = check_series(metrics.series(kind), config) {
                anomalies.push(Anomaly {
                    timestamp: now,
                    module: module.clone(),
                    metric: kind,
                    current_value: current,
                    baseline_avg: baseline,
                    deviation,
                    deviation_percent: deviation * 100.0,
                    threshold_percent: config.threshold * 100.0,
                });
            }
        }
    }
    anomalies
}

/// Whether the last `recovery_runs` values are all back within threshold of
/// the mean of the `lookback` values preceding them.
pub fn check_recovery(values: &[f64], config: &AnomalyConfig) -> bool {
    let runs = config.recovery_runs;
    if runs == 0 || config.lookback == 0 || values.len() < config.lookback + runs {
        return false;
    }
    let split = values.len() - runs;
    let Some(baseline) = mean(&values[split - config.lookback..split]) else {
        return false;
    };
    values[split..].iter().all(|v| {
        relative_deviation(*v, baseline)
            .map(|d| d <= config.threshold)
            .unwrap_or(true)
    })
}

/// Parse the timestamp of an `anomalies.log` line, rejecting malformed lines.
fn parse_log_line(line: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = line.split(" | ").collect();
    if parts.len() < 6 {
        return None;
    }
    DateTime::parse_from_rfc3339(parts[0].trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Runs detection sweeps and keeps the anomaly log.
pub struct AnomalyDetector {
    tracker: PerformanceTracker,
    log_path: PathBuf,
    config: AnomalyConfig,
    /// Flagged (module, metric) pairs → the module's `last_update` when flagged.
    /// A pair is not re-logged until the module records new samples.
    active: HashMap<(String, MetricKind), Option<DateTime<Utc>>>,
}

impl AnomalyDetector {
    pub fn new(tracker: PerformanceTracker, log_path: impl Into<PathBuf>, config: AnomalyConfig) -> Self {
        AnomalyDetector {
            tracker,
            log_path: log_path.into(),
            config,
            active: HashMap::new(),
        }
    }

    /// One detection sweep. Returns the anomalies newly written to the log.
    pub async fn run(&mut self) -> Result<Vec<Anomaly>> {
        let doc = self.tracker.snapshot().await;
        let found = detect(&doc, &self.config, Utc::now());

        let mut fresh = Vec::new();
        for anomaly in found {
            let last_update = doc
                .modules
                .get(&anomaly.module)
                .and_then(|m| m.last_update);
            let key = (anomaly.module.clone(), anomaly.metric);
            if self.active.get(&key) == Some(&last_update) {
                continue;
            }
            warn!(
                "Anomaly detected: {} - {} deviation: {:.2}%",
                anomaly.module, anomaly.metric, anomaly.deviation_percent
            );
            self.active.insert(key, last_update);
            fresh.push(anomaly);
        }

        let lines: Vec<String> = fresh.iter().map(Anomaly::log_line).collect();
        files::append_lines(&self.log_path, &lines)?;

        let config = self.config;
        self.active.retain(|(module, metric), _| {
            let recovered = doc
                .modules
                .get(module)
                .map(|m| check_recovery(m.series(*metric), &config))
                .unwrap_or(true);
            if recovered {
                info!("Anomaly recovered: {} - {}", module, metric);
            }
            !recovered
        });

        Ok(fresh)
    }

    /// Logged anomaly lines from the last `hours` hours.
    pub fn recent(&self, hours: i64) -> Result<Vec<String>> {
        let cutoff = Duration::try_hours(hours)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .with_context(|| format!("anomaly window of {} hours is out of range", hours))?;
        recent_anomalies(&self.log_path, cutoff)
    }
}

pub fn recent_anomalies(path: &std::path::Path, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
    Ok(files::read_lines(path)?
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .filter(|l| parse_log_line(l).map(|t| t >= cutoff).unwrap_or(false))
        .collect())
}
