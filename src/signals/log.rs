use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::debug;

use super::{Signal, SignalKind};
use crate::files;

/// A signal read back from `signals.log`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedSignal {
    pub timestamp: DateTime<Utc>,
    /// "<home> vs <away>"
    pub matchup: String,
    pub signal: SignalKind,
    pub reason: String,
    pub odds: f64,
}

/// Append-only signal log, one ` | `-separated line per signal:
/// `<timestamp> | <home> vs <away> | <BUY|IGNORE> | <reason> | Odds: X.XX`
#[derive(Debug, Clone)]
pub struct SignalLog {
    path: PathBuf,
}

impl SignalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SignalLog { path: path.into() }
    }

    pub fn format_line(signal: &Signal) -> String {
        format!(
            "{} | {} | {} | {} | Odds: {:.2}",
            signal.timestamp.to_rfc3339(),
            signal.matchup(),
            signal.signal,
            signal.reason,
            signal.odds
        )
    }

    pub fn parse_line(line: &str) -> Option<LoggedSignal> {
        let parts: Vec<&str> = line.trim().split(" | ").collect();
        if parts.len() < 5 {
            return None;
        }
        let timestamp = DateTime::parse_from_rfc3339(parts[0]).ok()?.with_timezone(&Utc);
        let signal = parts[2].parse().ok()?;
        let odds = parts[4]
            .trim()
            .strip_prefix("Odds:")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0.0);
        Some(LoggedSignal {
            timestamp,
            matchup: parts[1].to_string(),
            signal,
            reason: parts[3].to_string(),
            odds,
        })
    }

    pub fn append(&self, signals: &[Signal]) -> Result<()> {
        let lines: Vec<String> = signals.iter().map(Self::format_line).collect();
        files::append_lines(&self.path, &lines)
    }

    /// Logged signals at or after `cutoff`. Malformed lines are skipped.
    pub fn since(&self, cutoff: DateTime<Utc>) -> Result<Vec<LoggedSignal>> {
        let lines = files::read_lines(&self.path)?;
        let mut skipped = 0usize;
        let signals = lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| {
                let parsed = Self::parse_line(l);
                if parsed.is_none() {
                    skipped += 1;
                }
                parsed
            })
            .filter(|s| s.timestamp >= cutoff)
            .collect();
        if skipped > 0 {
            debug!("Skipped {} malformed lines in {}", skipped, self.path.display());
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signal(kind: SignalKind, at: DateTime<Utc>) -> Signal {
        Signal {
            timestamp: at,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            commence_time: "2026-10-18T15:00:00Z".into(),
            signal: kind,
            reason: "High odds (4.50) with low variance".into(),
            odds: 4.5,
        }
    }

    #[test]
    fn line_format_matches_log_layout() {
        let at = DateTime::parse_from_rfc3339("2026-10-18T12:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            SignalLog::format_line(&signal(SignalKind::Buy, at)),
            "2026-10-18T12:00:00+00:00 | Arsenal vs Chelsea | BUY | High odds (4.50) with low variance | Odds: 4.50"
        );
    }

    #[test]
    fn since_filters_window_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signals.log");
        let log = SignalLog::new(&path);
        let now = Utc::now();
        log.append(&[
            signal(SignalKind::Ignore, now - Duration::hours(30)),
            signal(SignalKind::Buy, now),
        ])
        .unwrap();
        files::append_lines(&path, &["not a signal".into(), "x | y | MAYBE | z | Odds: 1".into()])
            .unwrap();

        let recent = log.since(now - Duration::hours(24)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].signal, SignalKind::Buy);
        assert!((recent[0].odds - 4.5).abs() < 1e-9);
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = SignalLog::new(dir.path().join("none.log"));
        assert!(log.since(Utc::now()).unwrap().is_empty());
    }
}
