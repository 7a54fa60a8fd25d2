//! Short-lived response cache in front of The Odds API.
//!
//! Identical requests made within the TTL are answered from memory. Keys are
//! the request URL plus its query parameters sorted by name.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::types::OddsEvent;

/// Thread-safe TTL cache of decoded odds responses.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<RwLock<HashMap<String, CachedResponse>>>,
    ttl: Duration,
    capacity: usize,
}

#[derive(Clone)]
struct CachedResponse {
    events: Vec<OddsEvent>,
    stored_at: Instant,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        ResponseCache {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Canonical cache key for a request.
    pub fn key(url: &str, params: &BTreeMap<&str, String>) -> String {
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", url, query.join("&"))
    }

    /// Cached events for `key`, if present and younger than the TTL.
    pub async fn get(&self, key: &str) -> Option<Vec<OddsEvent>> {
        let inner = self.inner.read().await;
        inner
            .get(key)
            .filter(|c| c.stored_at.elapsed() < self.ttl)
            .map(|c| c.events.clone())
    }

    pub async fn insert(&self, key: String, events: Vec<OddsEvent>) {
        let mut inner = self.inner.write().await;
        let ttl = self.ttl;
        inner.retain(|_, c| c.stored_at.elapsed() < ttl);

        if inner.len() >= self.capacity && !inner.contains_key(&key) {
            let oldest = inner
                .iter()
                .min_by_key(|(_, c)| c.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                inner.remove(&oldest);
            }
        }

        inner.insert(
            key,
            CachedResponse {
                events,
                stored_at: Instant::now(),
            },
        );
        debug!("ResponseCache: {} entries", inner.len());
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
