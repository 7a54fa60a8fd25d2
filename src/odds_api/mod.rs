pub mod cache;
pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::FetchError;

pub use cache::ResponseCache;
pub use client::OddsApiClient;
pub use types::{flatten_events, OddsEvent};

/// Anything the collector can pull odds from.
#[async_trait]
pub trait OddsSource: Send + Sync {
    /// Current odds for every upcoming fixture. `Ok(None)` means the source
    /// is not configured and the cycle should be skipped.
    async fn fetch_odds(&self) -> Result<Option<Vec<OddsEvent>>, FetchError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
