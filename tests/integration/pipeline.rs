//! Aggregate → score → narrate, driven through the public library API.

use chrono::Duration;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use echosphere::cache::{ManualClock, ProviderCache};
use echosphere::data::{ProviderAdapter, ProviderRegistry};
use echosphere::engine::scoring::{self, NO_ISSUES};
use echosphere::engine::{Aggregator, NarrativeSettings, Narrator};
use echosphere::storage::{SqliteStore, Store};
use echosphere::types::{
    AreaMetrics, Category, Coordinate, FloodRiskLevel, PriorityLevel, ProviderQuery, Role,
};

use crate::stubs::{CountingUpstream, FailingUpstream, StubModel};

const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

fn sibu() -> ProviderQuery {
    ProviderQuery::new(Coordinate::new(2.30, 111.82).unwrap(), 5.0)
}

fn synthetic(cache: Arc<ProviderCache>) -> ProviderRegistry {
    ProviderRegistry::synthetic(cache, 3600, TIMEOUT)
}

fn metrics(heat: f64, aqi: u32, green: f64, water: f64, flood: FloodRiskLevel) -> AreaMetrics {
    AreaMetrics {
        area: 3.0,
        center: None,
        bounds: None,
        heat_index: heat,
        air_quality: aqi,
        green_coverage: green,
        water_stress: Some(water),
        flood_risk: flood,
        population: 25_000,
        buildings: None,
    }
}

#[tokio::test]
async fn test_snapshot_is_deterministic_across_caches() {
    let first = Aggregator::new(Arc::new(synthetic(Arc::new(ProviderCache::memory_only()))))
        .fetch_all(&sibu())
        .await;
    let second = Aggregator::new(Arc::new(synthetic(Arc::new(ProviderCache::memory_only()))))
        .fetch_all(&sibu())
        .await;

    assert_eq!(first.metrics(), second.metrics());
    assert_eq!(scoring::summarize_snapshot(&first), scoring::summarize_snapshot(&second));
    assert_eq!(first.climate_data().climate_zone, "tropical");
}

#[tokio::test]
async fn test_failed_provider_keeps_request_alive() {
    let cache = Arc::new(ProviderCache::memory_only());
    let failing = FailingUpstream::new(Category::FloodRisk, "HTTP 502 Bad Gateway");
    let calls = failing.calls();
    let registry = synthetic(cache.clone()).with(ProviderAdapter::new(
        Arc::new(failing),
        cache.clone(),
        3600,
        TIMEOUT,
    ));
    let aggregator = Aggregator::new(Arc::new(registry));

    let snapshot = aggregator.fetch_all(&sibu()).await;
    assert_eq!(snapshot.failed_categories(), vec![Category::FloodRisk]);
    assert_eq!(snapshot.flood_risk.error.as_deref(), Some("HTTP 502 Bad Gateway"));
    assert_eq!(snapshot.flood_risk_data().flood_risk, FloodRiskLevel::Medium);

    // Fallbacks are not cached, so the next request retries upstream.
    aggregator.fetch_all(&sibu()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Scoring still runs over the merged snapshot.
    let summary = scoring::summarize_snapshot(&snapshot);
    assert!(!summary.recommendations.is_empty());
}

#[tokio::test]
async fn test_cache_expiry_with_manual_clock() {
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(ProviderCache::new(clock.clone(), None));
    let upstream = CountingUpstream::new(Category::Climate);
    let calls = upstream.calls();
    let adapter = ProviderAdapter::new(Arc::new(upstream), cache, 60, TIMEOUT);

    let first = adapter.fetch(&sibu()).await;
    let second = adapter.fetch(&sibu()).await;
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.data, second.data);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance(Duration::seconds(61));
    let third = adapter.fetch(&sibu()).await;
    assert!(!third.cached);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_database_tier_survives_memory_loss() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let clock = Arc::new(ManualClock::default());

    let warm = Arc::new(ProviderCache::new(clock.clone(), Some(store.clone())));
    let upstream = CountingUpstream::new(Category::AirQuality);
    let warm_calls = upstream.calls();
    ProviderAdapter::new(Arc::new(upstream), warm, 600, TIMEOUT)
        .fetch(&sibu())
        .await;
    assert_eq!(warm_calls.load(Ordering::SeqCst), 1);

    // A fresh process: empty memory tier, same database.
    let cold = Arc::new(ProviderCache::new(clock.clone(), Some(store.clone())));
    let upstream = CountingUpstream::new(Category::AirQuality);
    let cold_calls = upstream.calls();
    let adapter = ProviderAdapter::new(Arc::new(upstream), cold.clone(), 600, TIMEOUT);

    let result = adapter.fetch(&sibu()).await;
    assert!(result.cached);
    assert_eq!(result.source, "Synthetic Air Quality");
    assert_eq!(cold_calls.load(Ordering::SeqCst), 0);

    // Once expired, the sweep removes the row.
    clock.advance(Duration::seconds(601));
    let report = cold.sweep().await;
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(report.memory_purged, 1);
}

#[test]
fn test_threshold_boundaries() {
    let at = scoring::summarize(&metrics(32.0, 100, 25.0, 60.0, FloodRiskLevel::Low));
    assert_eq!(at.issues, vec![NO_ISSUES.to_string()]);
    assert_eq!(at.priority_level, PriorityLevel::Low);

    let over = scoring::summarize(&metrics(32.01, 101, 24.9, 60.1, FloodRiskLevel::Low));
    assert_eq!(over.issues.len(), 4);
    assert_eq!(over.priority_level, PriorityLevel::High);
}

#[test]
fn test_critical_escalation() {
    let m = metrics(36.0, 160, 10.0, 20.0, FloodRiskLevel::VeryHigh);
    assert!(scoring::critical_tally(&m) >= 2);
    assert_eq!(scoring::summarize(&m).priority_level, PriorityLevel::Critical);
}

#[tokio::test]
async fn test_narration_carries_snapshot_context() {
    let model = Arc::new(StubModel::new("Plant more shade trees along the river."));
    let narrator = Narrator::new(model.clone(), NarrativeSettings::default());
    let snapshot = Aggregator::new(Arc::new(synthetic(Arc::new(ProviderCache::memory_only()))))
        .fetch_all(&sibu())
        .await;
    let summary = scoring::summarize_snapshot(&snapshot);

    let narration = narrator.narrate(&snapshot, &summary, &[], "What should we fix first?").await;
    assert!(!narration.fallback);
    assert_eq!(narration.text, "Plant more shade trees along the river.");

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[1].content.contains("2.3000, 111.8200"));
    assert!(messages[1].content.contains(summary.priority_level.as_str()));
    assert_eq!(messages.last().unwrap().content, "What should we fix first?");
}

#[tokio::test]
async fn test_llm_failure_yields_fallback_text() {
    let model = Arc::new(StubModel::failing("rate limited"));
    let narrator = Narrator::new(model.clone(), NarrativeSettings::default());

    let chat = narrator.chat("hello", &[], None).await;
    assert!(chat.fallback);
    assert!(chat.text.contains("rate limited"));

    let m = metrics(36.0, 160, 10.0, 20.0, FloodRiskLevel::VeryHigh);
    let analysis = narrator.analyze(&m).await;
    assert!(analysis.fallback);
    assert!(!analysis.analysis.is_empty());
    assert_eq!(analysis.summary, scoring::summarize(&m));
    assert_eq!(model.call_count(), 2);
}
