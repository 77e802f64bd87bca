//! Concurrent fan-out across provider adapters.
//!
//! Every adapter runs as its own task and the aggregator waits for all of
//! them to settle. A failing (or panicking) provider never blocks the
//! others: its category is filled with the fallback result instead.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::data::ProviderRegistry;
use crate::types::{Category, EnvironmentalSnapshot, ProviderQuery, ProviderResult};

pub struct Aggregator {
    registry: Arc<ProviderRegistry>,
}

impl Aggregator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Fetch several categories concurrently. Results come back in the
    /// order of `categories`.
    pub async fn fetch_many(
        &self,
        categories: &[Category],
        query: &ProviderQuery,
    ) -> Vec<ProviderResult> {
        let tasks = categories.iter().map(|&category| {
            let registry = self.registry.clone();
            let query = query.clone();
            tokio::spawn(async move { registry.fetch(category, &query).await })
        });

        let settled = join_all(tasks).await;

        categories
            .iter()
            .zip(settled)
            .map(|(&category, outcome)| match outcome {
                Ok(result) => result,
                // Adapter failures are logged by the adapter; only a dead task lands here.
                Err(e) => {
                    warn!(category = %category, error = %e, "Provider task failed, using fallback data");
                    ProviderResult::fallback(category, query, format!("provider task failed: {e}"))
                }
            })
            .collect()
    }

    /// Fetch every snapshot category for one coordinate + radius.
    pub async fn fetch_all(&self, query: &ProviderQuery) -> EnvironmentalSnapshot {
        let results = self.fetch_many(&Category::SNAPSHOT, query).await;
        let mut by_category: HashMap<Category, ProviderResult> =
            results.into_iter().map(|r| (r.category, r)).collect();
        let mut take = |category: Category| {
            by_category.remove(&category).unwrap_or_else(|| {
                ProviderResult::fallback(category, query, "provider returned no result")
            })
        };

        let snapshot = EnvironmentalSnapshot {
            location: query.location,
            radius_km: query.radius_km,
            climate: take(Category::Climate),
            vegetation: take(Category::Vegetation),
            water: take(Category::Water),
            flood_risk: take(Category::FloodRisk),
            population: take(Category::Population),
            air_quality: take(Category::AirQuality),
            fetched_at: Utc::now(),
        };

        debug!(
            lat = query.location.lat,
            lng = query.location.lng,
            radius_km = query.radius_km,
            failed = snapshot.failed_categories().len(),
            "Snapshot assembled"
        );
        snapshot
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
