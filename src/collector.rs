use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::db::Database;
use crate::error::FetchError;
use crate::odds_api::{flatten_events, OddsSource};

/// Name the collector's runs (and API latency) are tracked under.
pub const MODULE: &str = "collector";

/// Fetch the current odds from `source` and store one row per
/// event × bookmaker × market × outcome. Returns the number of rows stored.
///
/// A disabled or failing source is logged and skipped; only storage errors
/// fail the job.
pub async fn collect_odds(
    source: &dyn OddsSource,
    db: &Database,
    now: DateTime<Utc>,
) -> Result<usize> {
    info!("Collector started");

    let events = match source.fetch_odds().await {
        Ok(Some(events)) => events,
        Ok(None) => {
            warn!("No odds data collected ({} disabled)", source.name());
            return Ok(0);
        }
        Err(e) => {
            match &e {
                FetchError::Timeout => error!("Timeout while fetching odds from {}", source.name()),
                FetchError::Connection(msg) => {
                    error!("Connection error while fetching odds from {}: {}", source.name(), msg)
                }
                FetchError::Status { status, body } => {
                    error!("{} returned HTTP {}: {}", source.name(), status, body)
                }
                FetchError::Decode(msg) => {
                    error!("Unreadable odds payload from {}: {}", source.name(), msg)
                }
                FetchError::Request(msg) => error!("Odds request failed: {}", msg),
            }
            warn!("No odds data collected");
            return Ok(0);
        }
    };

    let records = flatten_events(&events, now);
    let inserted = db
        .insert_odds(&records)
        .context("Failed to store collected odds")?;
    info!(
        "Collected {} odds records from {} events",
        inserted,
        events.len()
    );
    Ok(inserted)
}
