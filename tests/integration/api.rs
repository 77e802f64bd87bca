//! End-to-end HTTP scenarios against the full router.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use echosphere::api::{build_router, AppContext, AppState};
use echosphere::cache::ProviderCache;
use echosphere::data::{ProviderAdapter, ProviderRegistry};
use echosphere::engine::{Aggregator, NarrativeSettings, Narrator};
use echosphere::llm::ChatModel;
use echosphere::storage::{SqliteStore, Store};
use echosphere::types::Category;

use crate::stubs::{FailingUpstream, StubModel};

async fn app(model: Arc<dyn ChatModel>, registry: impl FnOnce(Arc<ProviderCache>) -> ProviderRegistry) -> AppState {
    let cache = Arc::new(ProviderCache::memory_only());
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().await.unwrap());
    let narrator = Arc::new(Narrator::new(model, NarrativeSettings::default()));
    Arc::new(AppContext::new(
        Aggregator::new(Arc::new(registry(cache.clone()))),
        narrator,
        store,
        cache,
    ))
}

fn synthetic(cache: Arc<ProviderCache>) -> ProviderRegistry {
    ProviderRegistry::synthetic(cache, 3600, Duration::from_secs(5))
}

async fn call(state: AppState, req: Request<Body>) -> (StatusCode, Value) {
    let resp = build_router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 2_000_000).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_comprehensive_scenario() {
    let state = app(Arc::new(StubModel::new("ok")), synthetic).await;
    let (status, body) =
        call(state, get("/api/earth-data/comprehensive?lat=2.30&lng=111.82&radius=5")).await;

    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_object().unwrap();
    for category in ["climate", "vegetation", "water", "flood_risk", "population"] {
        let block = &data[category];
        assert_eq!(block["success"], true, "{category}");
        assert!(!block["source"].as_str().unwrap().is_empty(), "{category}");
        assert_eq!(body["sources"][category], block["source"]);
    }
    assert_eq!(data.len(), 5);
    assert_eq!(body["location"]["lat"], 2.30);
    assert_eq!(body["location"]["lng"], 111.82);
    assert_eq!(body["location"]["radius_km"], 5.0);
}

#[tokio::test]
async fn test_provider_outage_is_not_a_server_error() {
    let state = app(Arc::new(StubModel::new("ok")), |cache| {
        synthetic(cache.clone()).with(ProviderAdapter::new(
            Arc::new(FailingUpstream::new(Category::Water, "connection reset")),
            cache,
            3600,
            Duration::from_secs(5),
        ))
    })
    .await;

    let (status, body) =
        call(state.clone(), get("/api/earth-data/comprehensive?lat=2.30&lng=111.82")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["water"]["success"], false);
    assert_eq!(body["data"]["water"]["error"], "connection reset");
    assert_eq!(body["data"]["water"]["data"]["water_stress_index"], 30.0);
    assert_eq!(body["sources"]["water"], "Fallback (Earth Data API unavailable)");
    assert_eq!(body["data"]["climate"]["success"], true);

    let (status, body) = call(
        state,
        post("/api/analyze-location", json!({ "lat": 2.30, "lng": 111.82, "radius_km": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["snapshot"]["water"]["success"], false);
    assert_eq!(body["analysis"], "ok");
}

#[tokio::test]
async fn test_chat_survives_llm_outage() {
    let model = Arc::new(StubModel::failing("upstream 503"));
    let state = app(model.clone(), synthetic).await;

    let (status, body) = call(
        state.clone(),
        post(
            "/api/chat-with-location?lat=2.30&lng=111.82",
            json!({ "message": "What is the flood risk here?" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response = body["response"].as_str().unwrap();
    assert!(!response.is_empty());
    assert!(response.contains("upstream 503"));

    // The fallback exchange is still recorded for the default session.
    let turns = state.store.get_recent_chat_turns("default", 5).await.unwrap();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].model, "stub-model");
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_explicit_history_overrides_stored_turns() {
    let model = Arc::new(StubModel::new("Noted."));
    let state = app(model.clone(), synthetic).await;

    call(state.clone(), post("/api/chat", json!({ "message": "one", "sessionId": "s" }))).await;
    call(
        state.clone(),
        post(
            "/api/chat",
            json!({
                "message": "two",
                "sessionId": "s",
                "chatHistory": [{ "role": "user", "content": "earlier" }]
            }),
        ),
    )
    .await;

    let requests = model.requests();
    let second = &requests[1].messages;
    assert_eq!(second.len(), 3);
    assert_eq!(second[1].content, "earlier");
}

#[tokio::test]
async fn test_area_delete_cascades() {
    let state = app(Arc::new(StubModel::new("analysis text")), synthetic).await;
    let area = json!({
        "name": "Old town",
        "boundary": {
            "type": "Polygon",
            "coordinates": [[[111.81, 2.29], [111.83, 2.29], [111.83, 2.31], [111.81, 2.31]]]
        }
    });
    let (status, created) = call(state.clone(), post("/api/areas", area)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        state.clone(),
        post(
            "/api/analyze-location",
            json!({ "lat": 2.30, "lng": 111.82, "area_id": id, "session_id": "old-town" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.store.latest_metrics(&id).await.unwrap().is_some());

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/areas/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(state.clone(), delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(state.store.latest_metrics(&id).await.unwrap().is_none());
    assert!(state.store.list_analyses(&id, 10).await.unwrap().is_empty());
    assert!(state.store.get_recent_chat_turns("old-town", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_report_gets_insight_for_environmental_issue() {
    let model = Arc::new(StubModel::new("Likely a blocked culvert."));
    let state = app(model.clone(), synthetic).await;
    let report = json!({
        "reporter_name": "Lim Wei",
        "reporter_email": "lim.wei@example.com",
        "report_type": "environmental_issue",
        "title": "Oil sheen on river",
        "description": "A visible oil sheen has been on the river near the wharf for two days.",
        "severity": "critical",
        "category": "flooding",
        "location": { "address": "Sibu wharf", "latitude": 2.29, "longitude": 111.83 },
        "date_observed": "2026-10-10T06:30:00Z"
    });

    let (status, receipt) = call(state.clone(), post("/api/reports/submit", report)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["estimated_review_time"], "24 hours");
    assert_eq!(model.call_count(), 1);

    let id = receipt["report_id"].as_str().unwrap();
    let stored = state.reports.get(id).await.unwrap();
    assert_eq!(stored.ai_analysis.unwrap().analysis, "Likely a blocked culvert.");
}
