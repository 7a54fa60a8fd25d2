//! BUY/IGNORE signals from recent odds.
//!
//! Odds rows are grouped per fixture. For each outcome the mean price and
//! sample standard deviation across observations are computed; a fixture is
//! a BUY when its best mean price clears `min_odds` while no outcome price
//! moves by `max_std` or more.

pub mod log;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::models::{EventKey, OddsRecord};
use crate::db::Database;
use crate::perf::mean;

pub use log::{LoggedSignal, SignalLog};

/// Name signal generation runs are tracked under.
pub const MODULE: &str = "signal_generator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalKind {
    Buy,
    Ignore,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Buy => f.write_str("BUY"),
            SignalKind::Ignore => f.write_str("IGNORE"),
        }
    }
}

impl FromStr for SignalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "BUY" => Ok(SignalKind::Buy),
            "IGNORE" => Ok(SignalKind::Ignore),
            other => anyhow::bail!("unknown signal '{}'", other),
        }
    }
}

/// Threshold rule shared by live signals and the backtest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalRule {
    /// Best mean odds must be strictly above this
    pub min_odds: f64,
    /// Every defined per-outcome std must be strictly below this
    pub max_std: f64,
}

impl Default for SignalRule {
    fn default() -> Self {
        SignalRule {
            min_odds: 2.0,
            max_std: 0.2,
        }
    }
}

impl SignalRule {
    pub fn from_config(config: &Config) -> Self {
        SignalRule {
            min_odds: config.buy_min_odds,
            max_std: config.buy_max_std,
        }
    }

    pub fn classify(&self, summary: &EventSummary) -> (SignalKind, String) {
        let stable = summary.max_std.map(|s| s < self.max_std).unwrap_or(true);
        if summary.max_odds > self.min_odds && stable {
            (
                SignalKind::Buy,
                format!("High odds ({:.2}) with low variance", summary.max_odds),
            )
        } else {
            (
                SignalKind::Ignore,
                format!("Odds {:.2} don't meet criteria", summary.max_odds),
            )
        }
    }
}

/// Per-fixture aggregate over all bookmakers and observations.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSummary {
    pub key: EventKey,
    /// Highest per-outcome mean price
    pub max_odds: f64,
    /// Lowest per-outcome mean price
    pub min_odds: f64,
    /// Highest per-outcome sample std, `None` when no outcome was seen twice
    pub max_std: Option<f64>,
}

/// Sample standard deviation (n − 1). `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Group rows per fixture, ordered by event key.
pub fn summarize(records: &[OddsRecord]) -> Vec<EventSummary> {
    let mut events: BTreeMap<EventKey, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
    for r in records {
        events
            .entry(r.event_key())
            .or_default()
            .entry(r.outcome_name.as_str())
            .or_default()
            .push(r.price);
    }

    events
        .into_iter()
        .filter_map(|(key, outcomes)| {
            let means: Vec<f64> = outcomes.values().filter_map(|p| mean(p)).collect();
            if means.is_empty() {
                return None;
            }
            let max_odds = means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min_odds = means.iter().copied().fold(f64::INFINITY, f64::min);
            let max_std = outcomes
                .values()
                .filter_map(|p| sample_std(p))
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
            Some(EventSummary {
                key,
                max_odds,
                min_odds,
                max_std,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: String,
    pub signal: SignalKind,
    pub reason: String,
    /// Best mean odds of the fixture
    pub odds: f64,
}

impl Signal {
    pub fn matchup(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

/// Classify every fixture present in `records`.
pub fn analyze(records: &[OddsRecord], rule: &SignalRule, now: DateTime<Utc>) -> Vec<Signal> {
    summarize(records)
        .into_iter()
        .map(|summary| {
            let (signal, reason) = rule.classify(&summary);
            debug!(
                "{} vs {}: {} (mean odds {:.2}-{:.2}, max std {:?})",
                summary.key.home_team,
                summary.key.away_team,
                signal,
                summary.min_odds,
                summary.max_odds,
                summary.max_std
            );
            Signal {
                timestamp: now,
                home_team: summary.key.home_team,
                away_team: summary.key.away_team,
                commence_time: summary.key.commence_time,
                signal,
                reason,
                odds: summary.max_odds,
            }
        })
        .collect()
}

/// Analyse the last `window` of odds and append the signals to the log.
pub fn generate_signals(
    db: &Database,
    log: &SignalLog,
    rule: &SignalRule,
    window: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Signal>> {
    let records = db.odds_since(now - window)?;
    if records.is_empty() {
        info!("No recent odds to analyse");
        return Ok(Vec::new());
    }

    let signals = analyze(&records, rule, now);
    log.append(&signals)?;
    if !signals.is_empty() {
        let buys = signals.iter().filter(|s| s.signal == SignalKind::Buy).count();
        info!(
            "Signal generated: {} signals ({} BUY, {} IGNORE)",
            signals.len(),
            buys,
            signals.len() - buys
        );
    }
    Ok(signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sample_record;
    use approx::assert_relative_eq;

    #[test]
    fn sample_std_uses_n_minus_one() {
        assert_eq!(sample_std(&[2.0]), None);
        assert_relative_eq!(sample_std(&[2.0, 4.0]).unwrap(), 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn single_observations_buy_on_threshold_alone() {
        let now = Utc::now();
        let rows = vec![
            sample_record("Arsenal", "Chelsea", "williamhill", "Arsenal", 1.8, now),
            sample_record("Arsenal", "Chelsea", "williamhill", "Draw", 3.4, now),
            sample_record("Arsenal", "Chelsea", "williamhill", "Chelsea", 4.5, now),
        ];
        let signals = analyze(&rows, &SignalRule::default(), now);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal, SignalKind::Buy);
        assert_eq!(signals[0].reason, "High odds (4.50) with low variance");
        assert_relative_eq!(signals[0].odds, 4.5, epsilon = 1e-12);
    }

    #[test]
    fn volatile_prices_are_ignored() {
        let now = Utc::now();
        let rows = vec![
            sample_record("Leeds", "Everton", "williamhill", "Leeds", 2.5, now),
            sample_record("Leeds", "Everton", "betfair", "Leeds", 3.5, now),
        ];
        let signals = analyze(&rows, &SignalRule::default(), now);
        assert_eq!(signals[0].signal, SignalKind::Ignore);
        assert_eq!(signals[0].reason, "Odds 3.00 don't meet criteria");
    }

    #[test]
    fn low_odds_are_ignored_and_bound_is_strict() {
        let now = Utc::now();
        let rows = vec![
            sample_record("Leeds", "Everton", "williamhill", "Leeds", 2.0, now),
            sample_record("Leeds", "Everton", "betfair", "Leeds", 2.0, now),
        ];
        let signals = analyze(&rows, &SignalRule::default(), now);
        assert_eq!(signals[0].signal, SignalKind::Ignore);
    }

    #[test]
    fn fixtures_are_grouped_and_sorted() {
        let now = Utc::now();
        let rows = vec![
            sample_record("Wolves", "Spurs", "williamhill", "Wolves", 2.4, now),
            sample_record("Arsenal", "Chelsea", "williamhill", "Arsenal", 1.5, now),
            sample_record("Wolves", "Spurs", "betfair", "Wolves", 2.5, now),
        ];
        let summaries = summarize(&rows);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].key.home_team, "Arsenal");
        assert_eq!(summaries[0].max_std, None);
        assert_relative_eq!(summaries[1].max_odds, 2.45, epsilon = 1e-12);
        assert_relative_eq!(summaries[1].min_odds, 2.45, epsilon = 1e-12);
        assert!(summaries[1].max_std.unwrap() < 0.2);
    }

    #[test]
    fn generate_signals_reads_window_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(":memory:").unwrap();
        let log = SignalLog::new(dir.path().join("signals.log"));
        let now = Utc::now();
        db.insert_odds(&[
            sample_record("Arsenal", "Chelsea", "williamhill", "Chelsea", 4.5, now),
            sample_record("Leeds", "Everton", "williamhill", "Leeds", 1.4, now - Duration::hours(3)),
        ])
        .unwrap();

        let signals =
            generate_signals(&db, &log, &SignalRule::default(), Duration::hours(1), now).unwrap();
        assert_eq!(signals.len(), 1);
        let logged = log.since(now - Duration::hours(1)).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].signal, SignalKind::Buy);
        assert_eq!(logged[0].matchup, "Arsenal vs Chelsea");
    }

    #[test]
    fn signal_kind_parses() {
        assert_eq!("BUY".parse::<SignalKind>().unwrap(), SignalKind::Buy);
        assert_eq!(" IGNORE ".parse::<SignalKind>().unwrap(), SignalKind::Ignore);
        assert!("SELL".parse::<SignalKind>().is_err());
    }
}
