//! Rolling per-module performance store.
//!
//! Every scheduled job runs through [`PerformanceTracker::track`], which
//! samples wall clock, process CPU time and resident memory around the job and
//! appends the result to `performance.json`. Each series keeps only the newest
//! `history_size` values, so the file behaves like a set of ring buffers.
//!
//! All jobs share one tracker. The read-modify-write cycle runs under an async
//! mutex and the file is replaced atomically, so concurrent jobs never lose
//! each other's samples and readers never see a half-written document.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::analysis::Baseline;
use super::mean;
use super::process::ResourceSample;
use super::timestamp;
use crate::files;

/// The metric series the tracker keeps per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Runtime,
    CpuUsage,
    MemoryUsage,
    ApiLatency,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Runtime,
        MetricKind::CpuUsage,
        MetricKind::MemoryUsage,
        MetricKind::ApiLatency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Runtime => "runtime",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::MemoryUsage => "memory_usage",
            MetricKind::ApiLatency => "api_latency",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling metrics for one module (one scheduled job).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetrics {
    /// Wall-clock seconds per run
    #[serde(default)]
    pub runtimes: Vec<f64>,
    /// Process CPU percent over each run
    #[serde(default)]
    pub cpu_usage: Vec<f64>,
    /// Resident-memory delta per run, MB
    #[serde(default)]
    pub memory_usage: Vec<f64>,
    /// Upstream API request latency, seconds
    #[serde(default)]
    pub api_latency: Vec<f64>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default, deserialize_with = "timestamp::option::deserialize")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub avg_runtime: f64,
    #[serde(default)]
    pub avg_cpu: f64,
    #[serde(default)]
    pub avg_memory: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_api_latency: Option<f64>,
}

impl ModuleMetrics {
    pub fn series(&self, kind: MetricKind) -> &[f64] {
        match kind {
            MetricKind::Runtime => &self.runtimes,
            MetricKind::CpuUsage => &self.cpu_usage,
            MetricKind::MemoryUsage => &self.memory_usage,
            MetricKind::ApiLatency => &self.api_latency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub function: String,
    pub runtime: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub api_latency: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

/// Measurements of a single job run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSample {
    pub runtime: f64,
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Everything persisted in `performance.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceDoc {
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleMetrics>,
    /// Newest last
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_optimization: Option<Baseline>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_optimization: Option<Baseline>,
}

impl PerformanceDoc {
    /// Append one job run to `module`, trimming every series to `capacity`.
    pub fn apply_run(
        &mut self,
        module: &str,
        function: &str,
        sample: RunSample,
        error: Option<String>,
        now: DateTime<Utc>,
        capacity: usize,
    ) {
        let m = self.modules.entry(module.to_string()).or_default();
        m.runtimes.push(sample.runtime);
        m.cpu_usage.push(sample.cpu_usage);
        m.memory_usage.push(sample.memory_usage);
        keep_last(&mut m.runtimes, capacity);
        keep_last(&mut m.cpu_usage, capacity);
        keep_last(&mut m.memory_usage, capacity);

        if error.is_none() {
            m.success_count += 1;
        } else {
            m.error_count += 1;
        }
        m.last_update = Some(now);
        m.avg_runtime = mean(&m.runtimes).unwrap_or(0.0);
        m.avg_cpu = mean(&m.cpu_usage).unwrap_or(0.0);
        m.avg_memory = mean(&m.memory_usage).unwrap_or(0.0);

        self.push_history(
            HistoryEntry {
                timestamp: now,
                module: module.to_string(),
                function: function.to_string(),
                runtime: sample.runtime,
                cpu_usage: sample.cpu_usage,
                memory_usage: sample.memory_usage,
                api_latency: None,
                success: error.is_none(),
                error,
            },
            capacity,
        );
    }

    /// Append an upstream latency sample. Run series and counters are untouched.
    pub fn apply_api_latency(
        &mut self,
        module: &str,
        latency: f64,
        now: DateTime<Utc>,
        capacity: usize,
    ) {
        let m = self.modules.entry(module.to_string()).or_default();
        m.api_latency.push(latency);
        keep_last(&mut m.api_latency, capacity);
        m.avg_api_latency = mean(&m.api_latency);
        m.last_update = Some(now);

        self.push_history(
            HistoryEntry {
                timestamp: now,
                module: module.to_string(),
                function: "api_request".to_string(),
                runtime: 0.0,
                cpu_usage: 0.0,
                memory_usage: 0.0,
                api_latency: Some(latency),
                success: true,
                error: None,
            },
            capacity,
        );
    }

    fn push_history(&mut self, entry: HistoryEntry, capacity: usize) {
        self.history.push(entry);
        if self.history.len() > capacity {
            let excess = self.history.len() - capacity;
            self.history.drain(..excess);
        }
    }
}

fn keep_last(values: &mut Vec<f64>, capacity: usize) {
    if values.len() > capacity {
        let excess = values.len() - capacity;
        values.drain(..excess);
    }
}

/// Shared handle to the on-disk performance store.
#[derive(Clone)]
pub struct PerformanceTracker {
    path: Arc<PathBuf>,
    capacity: usize,
    lock: Arc<Mutex<()>>,
}

impl PerformanceTracker {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        PerformanceTracker {
            path: Arc::new(path.into()),
            capacity: capacity.max(1),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current contents of the store. Missing or corrupt files read as empty.
    pub async fn snapshot(&self) -> PerformanceDoc {
        let _guard = self.lock.lock().await;
        files::read_json(&self.path).unwrap_or_default()
    }

    pub async fn module_metrics(&self, module: &str) -> Option<ModuleMetrics> {
        self.snapshot().await.modules.remove(module)
    }

    /// Apply `f` to the document and persist it, under the store lock.
    /// A store that exists but cannot be read is left untouched and reported
    /// as an error.
    pub async fn update<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut PerformanceDoc),
    {
        let _guard = self.lock.lock().await;
        let mut doc: PerformanceDoc = files::load_json(&self.path)
            .context("Not rewriting unreadable performance store")?
            .unwrap_or_default();
        f(&mut doc);
        files::write_json_atomic(&self.path, &doc)
    }

    pub async fn record_run(
        &self,
        module: &str,
        function: &str,
        sample: RunSample,
        error: Option<String>,
    ) {
        let capacity = self.capacity;
        let result = self
            .update(|doc| doc.apply_run(module, function, sample, error, Utc::now(), capacity))
            .await;
        match result {
            Ok(()) => debug!(
                "Recorded metrics for {}: runtime={:.3}s, cpu={:.2}%, memory={:.2}MB",
                module, sample.runtime, sample.cpu_usage, sample.memory_usage
            ),
            Err(e) => error!("Error recording metrics for {}: {:#}", module, e),
        }
    }

    pub async fn record_api_latency(&self, module: &str, latency: f64) {
        let capacity = self.capacity;
        let result = self
            .update(|doc| doc.apply_api_latency(module, latency, Utc::now(), capacity))
            .await;
        if let Err(e) = result {
            error!("Error recording API latency for {}: {:#}", module, e);
        }
    }

    /// Run `job`, record its runtime, CPU and memory under `module`, and hand
    /// back its result unchanged.
    pub async fn track<F, T, E>(&self, module: &str, function: &str, job: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let start = ResourceSample::now();
        let result = job.await;
        let end = ResourceSample::now();

        let (runtime, cpu_usage, memory_usage) = start.delta(&end);
        let error = result.as_ref().err().map(|e| e.to_string());
        self.record_run(
            module,
            function,
            RunSample {
                runtime,
                cpu_usage,
                memory_usage,
            },
            error,
        )
        .await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(runtime: f64) -> RunSample {
        RunSample {
            runtime,
            cpu_usage: 10.0,
            memory_usage: 1.0,
        }
    }

    #[test]
    fn apply_run_updates_counters_and_averages() {
        let mut doc = PerformanceDoc::default();
        let now = Utc::now();
        doc.apply_run("collector", "collect_odds", sample(1.0), None, now, 100);
        doc.apply_run("collector", "collect_odds", sample(3.0), Some("boom".into()), now, 100);

        let m = &doc.modules["collector"];
        assert_eq!(m.runtimes, vec![1.0, 3.0]);
        assert_eq!(m.success_count, 1);
        assert_eq!(m.error_count, 1);
        assert_relative_eq!(m.avg_runtime, 2.0, epsilon = 1e-9);
        assert_eq!(m.last_update, Some(now));
        assert_eq!(doc.history.len(), 2);
        assert!(!doc.history[1].success);
        assert_eq!(doc.history[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn series_and_history_are_capped_keeping_newest() {
        let mut doc = PerformanceDoc::default();
        let now = Utc::now();
        for i in 0..12 {
            doc.apply_run("backtester", "run_backtest", sample(i as f64), None, now, 5);
        }
        let m = &doc.modules["backtester"];
        assert_eq!(m.runtimes, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(m.cpu_usage.len(), 5);
        assert_eq!(m.memory_usage.len(), 5);
        assert_eq!(m.success_count, 12);
        assert_relative_eq!(m.avg_runtime, 9.0, epsilon = 1e-9);
        assert_eq!(doc.history.len(), 5);
        assert_relative_eq!(doc.history[0].runtime, 7.0, epsilon = 1e-9);
    }

    #[test]
    fn api_latency_does_not_pollute_run_series() {
        let mut doc = PerformanceDoc::default();
        let now = Utc::now();
        doc.apply_run("collector", "collect_odds", sample(0.5), None, now, 100);
        doc.apply_api_latency("collector", 0.2, now, 100);
        doc.apply_api_latency("collector", 0.4, now, 100);

        let m = &doc.modules["collector"];
        assert_eq!(m.runtimes, vec![0.5]);
        assert_eq!(m.success_count, 1);
        assert_eq!(m.api_latency, vec![0.2, 0.4]);
        assert_relative_eq!(m.avg_api_latency.unwrap(), 0.3, epsilon = 1e-9);
        assert_eq!(doc.history.last().unwrap().function, "api_request");
    }

    #[test]
    fn legacy_document_with_empty_baselines_parses() {
        let json = r#"{
            "modules": {"collector": {"runtimes": [0.4], "cpu_usage": [1.0],
                        "memory_usage": [0.1], "api_latency": [],
                        "success_count": 1, "error_count": 0}},
            "history": [],
            "before_optimization": {},
            "after_optimization": {}
        }"#;
        let doc: PerformanceDoc = serde_json::from_str(json).unwrap();
        assert_eq!(doc.modules["collector"].runtimes, vec![0.4]);
        assert!(doc.before_optimization.unwrap().modules.is_empty());
    }

    #[tokio::test]
    async fn naive_timestamps_from_older_files_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance.json");
        std::fs::write(
            &path,
            r#"{
                "modules": {"collector": {
                    "runtimes": [0.4, 0.5], "cpu_usage": [1.0, 2.0],
                    "memory_usage": [0.1, 0.2], "api_latency": [],
                    "io_wait_time": [], "thread_efficiency": [],
                    "success_count": 2, "error_count": 0,
                    "last_update": "2025-11-02T10:15:30.123456",
                    "avg_runtime": 0.45, "avg_cpu": 1.5, "avg_memory": 0.15}},
                "history": [{"timestamp": "2025-11-02T10:15:30.123456",
                    "module": "collector", "function": "collect_odds",
                    "runtime": 0.5, "cpu_usage": 2.0, "memory_usage": 0.2,
                    "api_latency": null, "success": true, "error": null}],
                "before_optimization": {"timestamp": "2025-11-01T09:00:00.5", "modules": {}},
                "after_optimization": {}
            }"#,
        )
        .unwrap();
        let tracker = PerformanceTracker::new(&path, 100);
        tracker.record_run("collector", "collect_odds", sample(1.0), None).await;

        let doc = tracker.snapshot().await;
        let m = &doc.modules["collector"];
        assert_eq!(m.runtimes, vec![0.4, 0.5, 1.0]);
        assert_eq!(m.success_count, 3);
        assert_eq!(doc.history.len(), 2);
        assert!(doc.before_optimization.unwrap().timestamp.is_some());
    }

    #[tokio::test]
    async fn unreadable_store_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("performance.json");
        let garbage = r#"{"modules": {"collector": {"runtimes": [0.4"#;
        std::fs::write(&path, garbage).unwrap();
        let tracker = PerformanceTracker::new(&path, 100);

        assert!(tracker.update(|_| {}).await.is_err());
        tracker.record_run("collector", "collect_odds", sample(1.0), None).await;
        assert_eq!(std::fs::read_to_string(&path).unwrap(), garbage);
        assert!(tracker.snapshot().await.modules.is_empty());
        assert!(tracker.module_metrics("collector").await.is_none());
    }

    #[tokio::test]
    async fn track_records_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PerformanceTracker::new(dir.path().join("performance.json"), 100);

        let ok: Result<u32, String> = tracker.track("signals", "generate", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        let err: Result<u32, String> = tracker
            .track("signals", "generate", async { Err("db locked".to_string()) })
            .await;
        assert_eq!(err.unwrap_err(), "db locked");

        let m = tracker.module_metrics("signals").await.unwrap();
        assert_eq!(m.success_count, 1);
        assert_eq!(m.error_count, 1);
        assert_eq!(m.runtimes.len(), 2);
        assert!(m.runtimes.iter().all(|r| *r >= 0.0));
        assert!(m.cpu_usage.iter().all(|c| *c >= 0.0));
    }

    #[tokio::test]
    async fn concurrent_recorders_do_not_lose_samples() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PerformanceTracker::new(dir.path().join("performance.json"), 100);

        let mut handles = Vec::new();
        for i in 0..20 {
            let t = tracker.clone();
            handles.push(tokio::spawn(async move {
                let module = if i % 2 == 0 { "collector" } else { "backtester" };
                t.record_run(module, "job", sample(i as f64), None).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let doc = tracker.snapshot().await;
        assert_eq!(doc.modules["collector"].runtimes.len(), 10);
        assert_eq!(doc.modules["backtester"].runtimes.len(), 10);
        assert_eq!(doc.history.len(), 20);
    }
}
