//! Offline views over the performance store: optimisation hints and
//! before/after baseline comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use super::tracker::PerformanceDoc;

/// Runs slower than this (seconds) count as slow.
pub const SLOW_RUNTIME_SECS: f64 = 1.0;
/// Runs allocating more than this (MB) count as memory-heavy.
pub const HIGH_MEMORY_MB: f64 = 10.0;
/// This many slow runs flag a module even when its average is fine.
pub const SLOW_RUNS_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleAnalysis {
    pub module: String,
    pub avg_runtime: f64,
    pub avg_memory: f64,
    pub avg_api_latency: Option<f64>,
    pub slow_runs: usize,
    pub high_memory_runs: usize,
    pub optimization_needed: bool,
}

pub fn analyze(doc: &PerformanceDoc) -> Vec<ModuleAnalysis> {
    doc.modules
        .iter()
        .map(|(name, m)| {
            let slow_runs = m.runtimes.iter().filter(|r| **r > SLOW_RUNTIME_SECS).count();
            let high_memory_runs = m
                .memory_usage
                .iter()
                .filter(|v| **v > HIGH_MEMORY_MB)
                .count();
            ModuleAnalysis {
                module: name.clone(),
                avg_runtime: m.avg_runtime,
                avg_memory: m.avg_memory,
                avg_api_latency: m.avg_api_latency,
                slow_runs,
                high_memory_runs,
                optimization_needed: m.avg_runtime > SLOW_RUNTIME_SECS
                    || m.avg_memory > HIGH_MEMORY_MB
                    || slow_runs >= SLOW_RUNS_LIMIT,
            }
        })
        .collect()
}

pub fn render_analysis(rows: &[ModuleAnalysis]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Performance Analysis:");
    let _ = writeln!(out, "{}", "=".repeat(60));
    if rows.is_empty() {
        let _ = writeln!(out, "No performance data recorded yet.");
    }
    for r in rows {
        let flag = |high: bool| if high { "[HIGH]" } else { "[OK]" };
        let _ = writeln!(out, "\n{}:", r.module.to_uppercase());
        let _ = writeln!(
            out,
            "  Avg Runtime: {:.3}s {}",
            r.avg_runtime,
            flag(r.avg_runtime > SLOW_RUNTIME_SECS)
        );
        let _ = writeln!(
            out,
            "  Avg Memory: {:.2}MB {}",
            r.avg_memory,
            flag(r.avg_memory > HIGH_MEMORY_MB)
        );
        if let Some(latency) = r.avg_api_latency {
            let _ = writeln!(out, "  Avg API Latency: {:.3}s", latency);
        }
        let _ = writeln!(out, "  High Runtime Runs (>1s): {}", r.slow_runs);
        let _ = writeln!(out, "  High Memory Runs (>10MB): {}", r.high_memory_runs);
        if r.optimization_needed {
            let _ = writeln!(out, "  [OPTIMIZATION NEEDED]");
        }
    }
    out
}

// ── Baselines ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineSlot {
    BeforeOptimization,
    AfterOptimization,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default, deserialize_with = "super::timestamp::option::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modules: BTreeMap<String, BaselineMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    #[serde(default)]
    pub avg_runtime: f64,
    #[serde(default)]
    pub avg_cpu: f64,
    #[serde(default)]
    pub avg_memory: f64,
    #[serde(default)]
    pub avg_api_latency: f64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

impl Baseline {
    /// Snapshot the current module averages.
    pub fn capture(doc: &PerformanceDoc, now: DateTime<Utc>) -> Self {
        let modules = doc
            .modules
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    BaselineMetrics {
                        avg_runtime: m.avg_runtime,
                        avg_cpu: m.avg_cpu,
                        avg_memory: m.avg_memory,
                        avg_api_latency: m.avg_api_latency.unwrap_or(0.0),
                        success_count: m.success_count,
                        error_count: m.error_count,
                    },
                )
            })
            .collect();
        Baseline {
            timestamp: Some(now),
            modules,
        }
    }
}

/// Store the current averages into `slot`, returning the snapshot.
pub fn save_baseline(doc: &mut PerformanceDoc, slot: BaselineSlot, now: DateTime<Utc>) -> Baseline {
    let baseline = Baseline::capture(doc, now);
    match slot {
        BaselineSlot::BeforeOptimization => doc.before_optimization = Some(baseline.clone()),
        BaselineSlot::AfterOptimization => doc.after_optimization = Some(baseline.clone()),
    }
    baseline
}

/// One before → now comparison. `improvement_pct` is positive when the value
/// went down.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricChange {
    pub metric: &'static str,
    pub before: f64,
    pub current: f64,
    pub improvement_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleComparison {
    pub module: String,
    pub changes: Vec<MetricChange>,
}

fn change(metric: &'static str, before: f64, current: f64) -> Option<MetricChange> {
    if before > 0.0 {
        Some(MetricChange {
            metric,
            before,
            current,
            improvement_pct: (before - current) / before * 100.0,
        })
    } else {
        None
    }
}

/// Compare a baseline with another snapshot, module by module. Modules missing
/// from either side are skipped, as are metrics with a zero `before` value.
pub fn compare(before: &Baseline, current: &Baseline) -> Vec<ModuleComparison> {
    before
        .modules
        .iter()
        .filter_map(|(name, b)| {
            let c = current.modules.get(name)?;
            let changes = [
                change("runtime", b.avg_runtime, c.avg_runtime),
                change("memory", b.avg_memory, c.avg_memory),
                change("api_latency", b.avg_api_latency, c.avg_api_latency),
            ]
            .into_iter()
            .flatten()
            .collect();
            Some(ModuleComparison {
                module: name.clone(),
                changes,
            })
        })
        .collect()
}

pub fn render_comparison(rows: &[ModuleComparison]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "PERFORMANCE COMPARISON: BEFORE vs AFTER OPTIMIZATION");
    let _ = writeln!(out, "{}", "=".repeat(60));
    if rows.is_empty() {
        let _ = writeln!(out, "No modules present in both snapshots.");
    }
    for row in rows {
        let _ = writeln!(out, "\n{}:", row.module.to_uppercase());
        for c in &row.changes {
            let (unit, precision) = if c.metric == "memory" { ("MB", 2) } else { ("s", 3) };
            let _ = writeln!(
                out,
                "  {}: {:.prec$}{unit} -> {:.prec$}{unit} ({:+.1}%)",
                c.metric,
                c.before,
                c.current,
                c.improvement_pct,
                prec = precision,
                unit = unit
            );
        }
    }
    let _ = writeln!(out, "{}", "=".repeat(60));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::tracker::RunSample;
    use approx::assert_relative_eq;

    fn doc_with(module: &str, runtimes: &[f64], memory: f64) -> PerformanceDoc {
        let mut doc = PerformanceDoc::default();
        for r in runtimes {
            doc.apply_run(
                module,
                "job",
                RunSample {
                    runtime: *r,
                    cpu_usage: 5.0,
                    memory_usage: memory,
                },
                None,
                Utc::now(),
                100,
            );
        }
        doc
    }

    #[test]
    fn analysis_flags_slow_modules() {
        let doc = doc_with("collector", &[0.2, 1.5, 1.2, 1.1, 0.1], 0.5);
        let rows = analyze(&doc);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slow_runs, 3);
        assert!(rows[0].optimization_needed);
        assert!(render_analysis(&rows).contains("[OPTIMIZATION NEEDED]"));
    }

    #[test]
    fn analysis_leaves_healthy_modules_alone() {
        let doc = doc_with("backtester", &[0.2, 0.3], 0.5);
        let rows = analyze(&doc);
        assert!(!rows[0].optimization_needed);
        assert_eq!(rows[0].high_memory_runs, 0);
    }

    #[test]
    fn analysis_flags_memory_heavy_modules() {
        let doc = doc_with("reporter", &[0.2], 25.0);
        let rows = analyze(&doc);
        assert_eq!(rows[0].high_memory_runs, 1);
        assert!(rows[0].optimization_needed);
    }

    #[test]
    fn save_and_compare_baselines() {
        let mut doc = doc_with("collector", &[0.4, 0.4], 2.0);
        let before = save_baseline(&mut doc, BaselineSlot::BeforeOptimization, Utc::now());
        assert!(doc.before_optimization.is_some());
        assert!(doc.after_optimization.is_none());

        let faster = doc_with("collector", &[0.3, 0.3], 1.0);
        let current = Baseline::capture(&faster, Utc::now());
        let rows = compare(&before, &current);
        assert_eq!(rows.len(), 1);
        let runtime = &rows[0].changes[0];
        assert_eq!(runtime.metric, "runtime");
        assert_relative_eq!(runtime.improvement_pct, 25.0, epsilon = 1e-9);
        let memory = &rows[0].changes[1];
        assert_relative_eq!(memory.improvement_pct, 50.0, epsilon = 1e-9);
        // No API latency recorded, so the metric is omitted.
        assert_eq!(rows[0].changes.len(), 2);
        assert!(render_comparison(&rows).contains("(+25.0%)"));
    }

    #[test]
    fn compare_skips_modules_missing_on_either_side() {
        let before = Baseline::capture(&doc_with("collector", &[1.0], 1.0), Utc::now());
        let current = Baseline::capture(&doc_with("backtester", &[1.0], 1.0), Utc::now());
        assert!(compare(&before, &current).is_empty());
    }
}
