use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One bookmaker price for one outcome of one event, as observed at `observed_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRecord {
    pub id: Option<i64>,
    pub sport_key: String,
    pub sport_title: String,
    pub home_team: String,
    pub away_team: String,
    /// Kick-off time exactly as the API reported it
    pub commence_time: String,
    /// Bookmaker key, e.g. "williamhill"
    pub bookmaker: String,
    /// Market key, e.g. "h2h"
    pub market: String,
    /// Outcome name: a team name or "Draw"
    pub outcome_name: String,
    /// Decimal odds
    pub price: f64,
    pub observed_at: DateTime<Utc>,
}

impl OddsRecord {
    /// Grouping key identifying the fixture this row belongs to.
    pub fn event_key(&self) -> EventKey {
        EventKey {
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            commence_time: self.commence_time.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub home_team: String,
    pub away_team: String,
    pub commence_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsStats {
    /// Distinct (home, away, commence_time) fixtures
    pub total_events: i64,
    pub total_records: i64,
    pub avg_odds: Option<f64>,
}
