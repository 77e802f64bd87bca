//! Provider adapter: cache lookup, upstream call with timeout, fallback.
//!
//! Policy for every category:
//! - cache hit: return the cached data with its original `source`,
//!   `success = true`, `cached = true`;
//! - miss: call the upstream under the adapter's timeout; on success cache
//!   the normalised payload for the category TTL;
//! - upstream failure or timeout: return the category fallback with
//!   `success = false` and the error text, and leave the cache untouched so
//!   the next request retries upstream.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::Upstream;
use crate::cache::ProviderCache;
use crate::types::{Category, EnvironmentalData, ProviderQuery, ProviderResult};

/// Longest TTL honoured; larger configured values are clamped.
const MAX_TTL_SECS: u64 = 365 * 24 * 3600;

/// What the adapter stores in the cache for one upstream response.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPayload {
    source: String,
    data: Value,
    fetched_at: DateTime<Utc>,
}

pub struct ProviderAdapter {
    category: Category,
    upstream: Arc<dyn Upstream>,
    cache: Arc<ProviderCache>,
    ttl: Duration,
    timeout: std::time::Duration,
}

impl ProviderAdapter {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cache: Arc<ProviderCache>,
        ttl_secs: u64,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            category: upstream.category(),
            upstream,
            cache,
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
            timeout,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn source(&self) -> String {
        self.upstream.source()
    }

    /// Fetch data for a query. Never fails; see the module docs.
    pub async fn fetch(&self, query: &ProviderQuery) -> ProviderResult {
        let key = self.upstream.cache_key(query);

        if let Some(value) = self.cache.get(&key).await {
            match self.decode_cached(value) {
                Ok(result) => {
                    debug!(category = %self.category, cache_key = %key, "Serving cached provider data");
                    return result;
                }
                Err(e) => {
                    warn!(category = %self.category, cache_key = %key, error = %e, "Discarding undecodable cache entry");
                    self.cache.delete(&key);
                }
            }
        }

        let outcome = tokio::time::timeout(self.timeout, self.upstream.fetch(query)).await;
        let data = match outcome {
            Ok(Ok(data)) if data.category() == self.category => data,
            Ok(Ok(data)) => {
                return self.fallback(
                    query,
                    format!("upstream returned {} data", data.category()),
                );
            }
            Ok(Err(e)) => return self.fallback(query, format!("{e:#}")),
            Err(_) => {
                return self.fallback(
                    query,
                    format!("upstream timed out after {}s", self.timeout.as_secs_f64()),
                );
            }
        };

        let source = self.upstream.source();
        let result = ProviderResult::ok(data, source.clone(), false);

        match serde_json::to_value(&result.data) {
            Ok(data) => {
                let payload = CachedPayload { source, data, fetched_at: result.timestamp };
                match serde_json::to_value(&payload) {
                    Ok(value) => self.cache.set(&key, value, self.ttl).await,
                    Err(e) => warn!(category = %self.category, error = %e, "Failed to encode cache payload"),
                }
            }
            Err(e) => warn!(category = %self.category, error = %e, "Failed to encode provider data"),
        }

        result
    }

    fn decode_cached(&self, value: Value) -> serde_json::Result<ProviderResult> {
        let payload: CachedPayload = serde_json::from_value(value)?;
        let data = EnvironmentalData::from_value(self.category, payload.data)?;
        Ok(ProviderResult {
            category: self.category,
            success: true,
            data,
            source: payload.source,
            timestamp: payload.fetched_at,
            cached: true,
            error: None,
        })
    }

    fn fallback(&self, query: &ProviderQuery, error: String) -> ProviderResult {
        warn!(
            category = %self.category,
            lat = query.location.lat,
            lng = query.location.lng,
            error = %error,
            "Provider failed, using fallback data"
        );
        ProviderResult::fallback(self.category, query, error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{query_cache_key, MockUpstream};
    use crate::types::{Coordinate, WaterData};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn query() -> ProviderQuery {
        ProviderQuery::new(Coordinate { lat: 2.30, lng: 111.82 }, 5.0)
    }

    fn water(stress: f64) -> EnvironmentalData {
        let mut data = WaterData::fallback();
        data.water_stress_index = stress;
        EnvironmentalData::Water(data)
    }

    fn mock_water() -> MockUpstream {
        let mut upstream = MockUpstream::new();
        upstream.expect_category().return_const(Category::Water);
        upstream.expect_source().returning(|| "Test Water Source".to_string());
        upstream
            .expect_cache_key()
            .returning(|q| query_cache_key("test_water", q));
        upstream
    }

    fn adapter(upstream: MockUpstream, timeout_ms: u64) -> ProviderAdapter {
        ProviderAdapter::new(
            Arc::new(upstream),
            Arc::new(ProviderCache::memory_only()),
            3600,
            std::time::Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut upstream = mock_water();
        upstream.expect_fetch().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(water(42.0))
        });
        let adapter = adapter(upstream, 1000);

        let first = adapter.fetch(&query()).await;
        assert!(first.success);
        assert!(!first.cached);
        assert_eq!(first.source, "Test Water Source");

        let second = adapter.fetch(&query()).await;
        assert!(second.success);
        assert!(second.cached);
        assert_eq!(second.source, "Test Water Source");
        assert_eq!(second.data, water(42.0));
        assert_eq!(second.timestamp, first.timestamp);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_fallback_and_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut upstream = mock_water();
        upstream.expect_fetch().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("HTTP 503"))
        });
        let adapter = adapter(upstream, 1000);

        let result = adapter.fetch(&query()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("HTTP 503"));
        assert_eq!(result.data, EnvironmentalData::Water(WaterData::fallback()));
        assert_eq!(result.source, "Fallback (Earth Data API unavailable)");

        adapter.fetch(&query()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrong_category_is_a_failure() {
        let mut upstream = mock_water();
        upstream
            .expect_fetch()
            .returning(|_| Ok(EnvironmentalData::Vegetation(crate::types::VegetationData::fallback())));
        let result = adapter(upstream, 1000).fetch(&query()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("vegetation"));
    }

    struct SlowUpstream;

    #[async_trait::async_trait]
    impl Upstream for SlowUpstream {
        fn category(&self) -> Category {
            Category::Water
        }

        fn source(&self) -> String {
            "slow".into()
        }

        fn cache_key(&self, query: &ProviderQuery) -> crate::cache::CacheKey {
            query_cache_key("slow", query)
        }

        async fn fetch(&self, _query: &ProviderQuery) -> anyhow::Result<EnvironmentalData> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(water(1.0))
        }
    }

    #[tokio::test]
    async fn test_timeout_returns_fallback() {
        let adapter = ProviderAdapter::new(
            Arc::new(SlowUpstream),
            Arc::new(ProviderCache::memory_only()),
            3600,
            std::time::Duration::from_millis(20),
        );
        let result = adapter.fetch(&query()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_caching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut upstream = mock_water();
        upstream.expect_fetch().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(water(10.0))
        });
        let adapter = ProviderAdapter::new(
            Arc::new(upstream),
            Arc::new(ProviderCache::memory_only()),
            0,
            std::time::Duration::from_secs(1),
        );
        adapter.fetch(&query()).await;
        adapter.fetch(&query()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_synthetic_values_independent_of_request_order() {
        use crate::data::SyntheticProvider;

        let near = ProviderQuery::new(Coordinate { lat: 2.300001, lng: 111.82 }, 5.0);
        let far = ProviderQuery::new(Coordinate { lat: 2.300049, lng: 111.82 }, 5.0);
        let synthetic = || {
            ProviderAdapter::new(
                Arc::new(SyntheticProvider::new(Category::Water)),
                Arc::new(ProviderCache::memory_only()),
                3600,
                std::time::Duration::from_secs(1),
            )
        };

        let fresh = synthetic().fetch(&far).await;

        let shared = synthetic();
        shared.fetch(&near).await;
        let after_neighbour = shared.fetch(&far).await;
        assert!(after_neighbour.cached);
        assert_eq!(after_neighbour.data, fresh.data);
    }
}
