use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::cache::ResponseCache;
use super::types::OddsEvent;
use super::OddsSource;
use crate::config::Config;
use crate::error::FetchError;
use crate::perf::PerformanceTracker;

/// Client for The Odds API v4 `/sports/{sport}/odds` endpoint.
#[derive(Clone)]
pub struct OddsApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    sport: String,
    regions: String,
    markets: String,
    cache: ResponseCache,
    tracker: PerformanceTracker,
    /// Module name the request latency is recorded under
    latency_module: String,
}

impl OddsApiClient {
    pub fn new(config: &Config, tracker: PerformanceTracker, latency_module: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(OddsApiClient {
            http,
            base_url: config.odds_api_url.trim_end_matches('/').to_string(),
            api_key: config.effective_api_key().map(str::to_string),
            sport: config.odds_sport.clone(),
            regions: config.odds_regions.clone(),
            markets: config.odds_markets.clone(),
            cache: ResponseCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_capacity,
            ),
            tracker,
            latency_module: latency_module.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/sports/{}/odds", self.base_url, self.sport)
    }

    /// Query parameters other than the API key; these form the cache key.
    fn query_params(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("regions", self.regions.clone());
        params.insert("markets", self.markets.clone());
        params.insert("oddsFormat", "decimal".to_string());
        params
    }
}

#[async_trait]
impl OddsSource for OddsApiClient {
    fn name(&self) -> &str {
        "TheOddsAPI"
    }

    async fn fetch_odds(&self) -> Result<Option<Vec<OddsEvent>>, FetchError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("ODDS_API_KEY not set; skipping odds fetch");
            return Ok(None);
        };

        let endpoint = self.endpoint();
        let params = self.query_params();
        let cache_key = ResponseCache::key(&endpoint, &params);
        if let Some(events) = self.cache.get(&cache_key).await {
            debug!("Serving {} events from response cache", events.len());
            return Ok(Some(events));
        }

        let url = Url::parse_with_params(
            &endpoint,
            params
                .iter()
                .map(|(k, v)| (*k, v.as_str()))
                .chain(std::iter::once(("apiKey", api_key))),
        )?;

        let started = Instant::now();
        let resp = self.http.get(url).send().await?;
        let latency = started.elapsed().as_secs_f64();

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status { status, body });
        }

        self.tracker
            .record_api_latency(&self.latency_module, latency)
            .await;

        let events: Vec<OddsEvent> = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        info!(
            "Fetched {} events from The Odds API (latency: {:.3}s)",
            events.len(),
            latency
        );

        self.cache.insert(cache_key, events.clone()).await;
        Ok(Some(events))
    }
}
