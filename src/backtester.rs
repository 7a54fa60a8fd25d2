use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::db::models::OddsRecord;
use crate::db::Database;
use crate::files;
use crate::signals::{summarize, SignalKind, SignalRule};

/// Name backtest runs are tracked under.
pub const MODULE: &str = "backtester";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_events: usize,
    pub total_signals: usize,
    pub buy_signals: usize,
    pub ignore_signals: usize,
    pub avg_odds: f64,
    pub max_odds: f64,
    pub min_odds: f64,
    pub timestamp: DateTime<Utc>,
}

/// Replay the signal rule over `records`. `None` when there is nothing to test.
pub fn calculate_metrics(
    records: &[OddsRecord],
    rule: &SignalRule,
    now: DateTime<Utc>,
) -> Option<BacktestMetrics> {
    if records.is_empty() {
        return None;
    }

    let events = summarize(records);
    let buy_signals = events
        .iter()
        .filter(|e| rule.classify(e).0 == SignalKind::Buy)
        .count();
    let ignore_signals = events.len() - buy_signals;

    let prices = records.iter().map(|r| r.price);
    let avg_odds = prices.clone().sum::<f64>() / records.len() as f64;
    let max_odds = prices.clone().fold(f64::NEG_INFINITY, f64::max);
    let min_odds = prices.fold(f64::INFINITY, f64::min);

    Some(BacktestMetrics {
        total_events: events.len(),
        total_signals: buy_signals + ignore_signals,
        buy_signals,
        ignore_signals,
        avg_odds,
        max_odds,
        min_odds,
        timestamp: now,
    })
}

/// `backtest_metrics.json`: every backtest result, newest last, capped.
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    path: PathBuf,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        MetricsHistory {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    /// Stored results; a missing or corrupt file reads as empty.
    pub fn load(&self) -> Vec<BacktestMetrics> {
        files::read_json(&self.path).unwrap_or_default()
    }

    pub fn append(&self, metrics: BacktestMetrics) -> Result<()> {
        let mut all = self.load();
        all.push(metrics);
        if all.len() > self.capacity {
            let excess = all.len() - self.capacity;
            all.drain(..excess);
        }
        files::write_json_atomic(&self.path, &all)
    }
}

/// Backtest the last `window` of odds and persist the result.
pub fn run_backtest(
    db: &Database,
    history: &MetricsHistory,
    rule: &SignalRule,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Option<BacktestMetrics>> {
    let records = db.odds_since(now - window)?;
    let Some(metrics) = calculate_metrics(&records, rule, now) else {
        warn!("No data available for backtesting");
        return Ok(None);
    };

    history.append(metrics.clone())?;
    info!(
        "Backtest complete: {} events, {} BUY / {} IGNORE, avg odds {:.2}",
        metrics.total_events, metrics.buy_signals, metrics.ignore_signals, metrics.avg_odds
    );
    Ok(Some(metrics))
}
