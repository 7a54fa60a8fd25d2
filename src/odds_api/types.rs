use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::OddsRecord;

/// One fixture from `/sports/{sport}/odds`. Missing fields default so a
/// partially populated event still yields rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsEvent {
    #[serde(default = "default_sport_key")]
    pub sport_key: String,
    #[serde(default = "default_sport_title")]
    pub sport_title: String,
    #[serde(default)]
    pub home_team: String,
    #[serde(default)]
    pub away_team: String,
    #[serde(default)]
    pub commence_time: String,
    #[serde(default)]
    pub bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmaker {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub markets: Vec<BookmakerMarket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmakerMarket {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
}

fn default_sport_key() -> String {
    "soccer".to_string()
}

fn default_sport_title() -> String {
    "Soccer".to_string()
}

/// Flatten events into one row per event × bookmaker × market × outcome.
pub fn flatten_events(events: &[OddsEvent], observed_at: DateTime<Utc>) -> Vec<OddsRecord> {
    let mut rows = Vec::new();
    for event in events {
        for bookmaker in &event.bookmakers {
            for market in &bookmaker.markets {
                for outcome in &market.outcomes {
                    rows.push(OddsRecord {
                        id: None,
                        sport_key: event.sport_key.clone(),
                        sport_title: event.sport_title.clone(),
                        home_team: event.home_team.clone(),
                        away_team: event.away_team.clone(),
                        commence_time: event.commence_time.clone(),
                        bookmaker: bookmaker.key.clone(),
                        market: market.key.clone(),
                        outcome_name: outcome.name.clone(),
                        price: outcome.price,
                        observed_at,
                    });
                }
            }
        }
    }
    rows
}
