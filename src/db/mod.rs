use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Thread-safe SQLite handle (single connection behind a mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path.
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Odds ─────────────────────────────────────────────────────────────────

    /// Insert a batch of odds rows in one transaction. Returns rows inserted.
    pub fn insert_odds(&self, records: &[OddsRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        // Dropping the transaction without commit rolls it back.
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO odds (
                    sport_key, sport_title, home_team, away_team, commence_time,
                    bookmaker, market, outcome_name, price, observed_at
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.sport_key,
                    r.sport_title,
                    r.home_team,
                    r.away_team,
                    r.commence_time,
                    r.bookmaker,
                    r.market,
                    r.outcome_name,
                    r.price,
                    r.observed_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// All odds observed at or after `cutoff`, newest first.
    pub fn odds_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<OddsRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sport_key, sport_title, home_team, away_team, commence_time,
                    bookmaker, market, outcome_name, price, observed_at
             FROM odds WHERE observed_at >= ?1 ORDER BY observed_at DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], map_odds)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Like [`Database::odds_since`] but capped to `limit` rows.
    pub fn recent_odds(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<OddsRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, sport_key, sport_title, home_team, away_team, commence_time,
                    bookmaker, market, outcome_name, price, observed_at
             FROM odds WHERE observed_at >= ?1
             ORDER BY observed_at DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![cutoff, limit], map_odds)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    pub fn odds_stats(&self) -> Result<OddsStats> {
        let conn = self.conn()?;
        let total_events: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (
                SELECT DISTINCT home_team, away_team, commence_time FROM odds
             )",
            [],
            |r| r.get(0),
        )?;
        let (total_records, avg_odds): (i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), AVG(price) FROM odds",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(OddsStats {
            total_events,
            total_records,
            avg_odds,
        })
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn map_odds(row: &rusqlite::Row) -> rusqlite::Result<OddsRecord> {
    Ok(OddsRecord {
        id: row.get(0)?,
        sport_key: row.get(1)?,
        sport_title: row.get(2)?,
        home_team: row.get(3)?,
        away_team: row.get(4)?,
        commence_time: row.get(5)?,
        bookmaker: row.get(6)?,
        market: row.get(7)?,
        outcome_name: row.get(8)?,
        price: row.get(9)?,
        observed_at: row.get(10)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS odds (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    sport_key     TEXT    NOT NULL,
    sport_title   TEXT    NOT NULL,
    home_team     TEXT    NOT NULL,
    away_team     TEXT    NOT NULL,
    commence_time TEXT    NOT NULL,
    bookmaker     TEXT    NOT NULL,
    market        TEXT    NOT NULL,
    outcome_name  TEXT    NOT NULL,
    price         REAL    NOT NULL,
    observed_at   TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_odds_observed_at ON odds(observed_at);
CREATE INDEX IF NOT EXISTS idx_odds_event ON odds(home_team, away_team, commence_time);
"#;

#[cfg(test)]
pub(crate) fn sample_record(
    home: &str,
    away: &str,
    bookmaker: &str,
    outcome: &str,
    price: f64,
    observed_at: DateTime<Utc>,
) -> OddsRecord {
    OddsRecord {
        id: None,
        sport_key: "soccer_epl".into(),
        sport_title: "EPL".into(),
        home_team: home.into(),
        away_team: away.into(),
        commence_time: "2026-10-18T15:00:00Z".into(),
        bookmaker: bookmaker.into(),
        market: "h2h".into(),
        outcome_name: outcome.into(),
        price,
        observed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    #[test]
    fn empty_database_stats() {
        let db = Database::open(":memory:").unwrap();
        let stats = db.odds_stats().unwrap();
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.total_records, 0);
        assert!(stats.avg_odds.is_none());
    }

    #[test]
    fn insert_and_query_window() {
        let db = Database::open(":memory:").unwrap();
        let now = Utc::now();
        let old = now - Duration::hours(3);
        let rows = vec![
            sample_record("Arsenal", "Chelsea", "bet365", "Arsenal", 2.1, now),
            sample_record("Arsenal", "Chelsea", "bet365", "Chelsea", 3.4, now),
            sample_record("Leeds", "Everton", "unibet", "Draw", 3.0, old),
        ];
        assert_eq!(db.insert_odds(&rows).unwrap(), 3);

        let recent = db.odds_since(now - Duration::hours(1)).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.home_team == "Arsenal"));
        assert!(recent[0].id.is_some());

        let all = db.odds_since(now - Duration::days(1)).unwrap();
        assert_eq!(all.len(), 3);

        let capped = db.recent_odds(now - Duration::days(1), 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn stats_count_distinct_events() {
        let db = Database::open(":memory:").unwrap();
        let now = Utc::now();
        db.insert_odds(&[
            sample_record("Arsenal", "Chelsea", "bet365", "Arsenal", 2.0, now),
            sample_record("Arsenal", "Chelsea", "unibet", "Arsenal", 3.0, now),
            sample_record("Leeds", "Everton", "unibet", "Draw", 4.0, now),
        ])
        .unwrap();

        let stats = db.odds_stats().unwrap();
        assert_eq!(stats.total_events, 2);
        assert_eq!(stats.total_records, 3);
        assert_relative_eq!(stats.avg_odds.unwrap(), 3.0, epsilon = 1e-9);
    }

    #[test]
    fn insert_empty_batch_is_noop() {
        let db = Database::open(":memory:").unwrap();
        assert_eq!(db.insert_odds(&[]).unwrap(), 0);
    }
}
