use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::fmt::Write;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::db::models::OddsRecord;
use crate::db::Database;
use crate::signals::{LoggedSignal, SignalKind, SignalLog};

/// Name report runs are tracked under.
pub const MODULE: &str = "reporter";

/// Plain-text summary of the odds and signals in the report window.
pub fn generate_summary(
    records: &[OddsRecord],
    signals: &[LoggedSignal],
    window_hours: i64,
    now: DateTime<Utc>,
) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "BETSENTINEL DAILY REPORT");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Generated: {}", now.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out);

    if records.is_empty() {
        let _ = writeln!(
            out,
            "No odds data available for the last {} hours.",
            window_hours
        );
    } else {
        let events: HashSet<_> = records.iter().map(OddsRecord::event_key).collect();
        let bookmakers: HashSet<&str> = records.iter().map(|r| r.bookmaker.as_str()).collect();
        let prices = records.iter().map(|r| r.price);
        let avg = prices.clone().sum::<f64>() / records.len() as f64;
        let min = prices.clone().fold(f64::INFINITY, f64::min);
        let max = prices.fold(f64::NEG_INFINITY, f64::max);

        let _ = writeln!(out, "ODDS STATISTICS:");
        let _ = writeln!(out, "  Total records: {}", records.len());
        let _ = writeln!(out, "  Unique events: {}", events.len());
        let _ = writeln!(out, "  Average odds: {:.2}", avg);
        let _ = writeln!(out, "  Min odds: {:.2}", min);
        let _ = writeln!(out, "  Max odds: {:.2}", max);
        let _ = writeln!(out, "  Unique bookmakers: {}", bookmakers.len());
    }

    let buys = signals.iter().filter(|s| s.signal == SignalKind::Buy).count();
    let ignores = signals.iter().filter(|s| s.signal == SignalKind::Ignore).count();
    let _ = writeln!(out);
    let _ = writeln!(out, "SIGNALS GENERATED:");
    let _ = writeln!(
        out,
        "  Total signals in last {}h: {}",
        window_hours,
        signals.len()
    );
    let _ = writeln!(out, "  BUY signals: {}", buys);
    let _ = writeln!(out, "  IGNORE signals: {}", ignores);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", rule);
    out
}

/// Build the report for the last `window_hours` and write it to `report_path`.
pub fn generate_daily_report(
    db: &Database,
    signal_log: &SignalLog,
    report_path: &Path,
    window_hours: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let cutoff = now - Duration::hours(window_hours);
    let records = db.odds_since(cutoff)?;
    let signals = signal_log.since(cutoff)?;

    let summary = generate_summary(&records, &signals, window_hours, now);
    if let Some(parent) = report_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(report_path, &summary)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    info!("Report generated: {}", report_path.display());
    info!("\n{}", summary);
    Ok(summary)
}
