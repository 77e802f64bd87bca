//! Environmental data providers.
//!
//! Defines the `Upstream` trait (one data source for one category) and the
//! [`ProviderRegistry`] that wires each category to a [`ProviderAdapter`].
//! Whether a category is served by a live HTTP upstream or by the
//! deterministic synthetic generator is decided once, at construction,
//! from `[providers.categories.<category>].mode`.

pub mod adapter;
pub mod air_quality;
pub mod climate;
pub mod events;
pub mod imagery;
pub mod synthetic;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheKey, ProviderCache};
use crate::config::{AppConfig, ProviderMode};
use crate::types::{Category, EnvironmentalData, ProviderQuery, ProviderResult};

pub use adapter::ProviderAdapter;
pub use synthetic::SyntheticProvider;

/// Abstraction over one external (or simulated) data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Upstream: Send + Sync {
    /// The category this upstream serves.
    fn category(&self) -> Category;

    /// Label recorded as `source` on results.
    fn source(&self) -> String;

    /// Deterministic cache identity for a query.
    fn cache_key(&self, query: &ProviderQuery) -> CacheKey;

    /// Fetch and normalise data into the category schema.
    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData>;
}

/// Cache key from the rounded coordinate, radius and any query options.
pub fn query_cache_key(api_source: &str, query: &ProviderQuery) -> CacheKey {
    let mut key = CacheKey::new(api_source)
        .coord("lat", query.location.lat)
        .coord("lng", query.location.lng)
        .param("radius_km", query.radius_km);
    for (name, value) in &query.options {
        key = key.param(name.clone(), value.clone());
    }
    key
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One adapter per category.
pub struct ProviderRegistry {
    adapters: HashMap<Category, Arc<ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    /// Register (or replace) the adapter for its category.
    pub fn insert(&mut self, adapter: ProviderAdapter) {
        self.adapters.insert(adapter.category(), Arc::new(adapter));
    }

    pub fn with(mut self, adapter: ProviderAdapter) -> Self {
        self.insert(adapter);
        self
    }

    /// Every category backed by the synthetic generator.
    pub fn synthetic(cache: Arc<ProviderCache>, ttl_secs: u64, timeout: Duration) -> Self {
        let mut registry = Self::new();
        for category in Category::ALL {
            registry.insert(ProviderAdapter::new(
                Arc::new(SyntheticProvider::new(category)),
                cache.clone(),
                ttl_secs,
                timeout,
            ));
        }
        registry
    }

    /// Build adapters for every category from configuration.
    pub fn from_config(config: &AppConfig, cache: Arc<ProviderCache>) -> Result<Self> {
        let providers = &config.providers;
        let timeout = Duration::from_secs(providers.timeout_secs);
        let mut registry = Self::new();

        for category in Category::ALL {
            let mode = providers.category(category).mode;
            let upstream: Arc<dyn Upstream> = match (mode, category) {
                (ProviderMode::Live, Category::Climate) => {
                    Arc::new(climate::OpenMeteoClimate::new(&providers.open_meteo_url, timeout)?)
                }
                (ProviderMode::Live, Category::AirQuality) => Arc::new(
                    air_quality::OpenAqProvider::new(
                        &providers.openaq_url,
                        AppConfig::resolve_secret(providers.openaq_key_env.as_deref()),
                        timeout,
                    )?,
                ),
                (ProviderMode::Live, Category::Imagery) => Arc::new(imagery::NasaImagery::new(
                    &providers.nasa_api_url,
                    AppConfig::resolve_secret(providers.nasa_key_env.as_deref()),
                    timeout,
                )?),
                (ProviderMode::Live, Category::DisasterEvents) => {
                    Arc::new(events::EonetEvents::new(&providers.eonet_url, timeout)?)
                }
                (ProviderMode::Live, other) => {
                    warn!(category = %other, "No live upstream for category, using synthetic data");
                    Arc::new(SyntheticProvider::new(other))
                }
                (ProviderMode::Synthetic, other) => Arc::new(SyntheticProvider::new(other)),
            };

            let ttl_secs = providers.ttl_secs(category, &config.cache);
            info!(category = %category, source = %upstream.source(), ttl_secs, "Provider configured");
            registry.insert(ProviderAdapter::new(upstream, cache.clone(), ttl_secs, timeout));
        }

        Ok(registry)
    }

    pub fn get(&self, category: Category) -> Option<Arc<ProviderAdapter>> {
        self.adapters.get(&category).cloned()
    }

    /// Fetch one category. A missing adapter yields the fallback result.
    pub async fn fetch(&self, category: Category, query: &ProviderQuery) -> ProviderResult {
        match self.adapters.get(&category) {
            Some(adapter) => adapter.fetch(query).await,
            None => ProviderResult::fallback(category, query, "no provider configured"),
        }
    }

    /// Category → source label, for the health endpoint.
    pub fn sources(&self) -> HashMap<Category, String> {
        self.adapters.iter().map(|(c, a)| (*c, a.source())).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Coordinate;

    fn query() -> ProviderQuery {
        ProviderQuery::new(Coordinate { lat: 2.30, lng: 111.82 }, 5.0)
    }

    #[test]
    fn test_query_cache_key_includes_options() {
        let plain = query_cache_key("nasa_imagery", &query());
        let with_dim = query_cache_key("nasa_imagery", &query().with_option("dim", 0.2));
        assert_ne!(plain, with_dim);
        assert!(with_dim.as_string().contains("\"dim\":0.2"));
    }

    #[test]
    fn test_query_cache_key_rounds_coordinates() {
        let a = query_cache_key("x", &ProviderQuery::new(Coordinate { lat: 2.300001, lng: 111.82 }, 5.0));
        let b = query_cache_key("x", &query());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_synthetic_registry_covers_all_categories() {
        let registry = ProviderRegistry::synthetic(
            Arc::new(ProviderCache::memory_only()),
            3600,
            Duration::from_secs(1),
        );
        for category in Category::ALL {
            let result = registry.fetch(category, &query()).await;
            assert!(result.success, "{category} failed");
            assert_eq!(result.data.category(), category);
        }
    }

    #[tokio::test]
    async fn test_missing_adapter_falls_back() {
        let registry = ProviderRegistry::new();
        let result = registry.fetch(Category::Water, &query()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no provider configured"));
    }

    #[test]
    fn test_from_config_live_without_upstream_uses_synthetic() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8000

            [providers.categories.vegetation]
            mode = "live"
            "#,
        )
        .unwrap();
        let registry =
            ProviderRegistry::from_config(&config, Arc::new(ProviderCache::memory_only())).unwrap();
        let sources = registry.sources();
        assert_eq!(sources.len(), Category::ALL.len());
        assert!(sources[&Category::Vegetation].contains("Synthetic"));
    }
}
