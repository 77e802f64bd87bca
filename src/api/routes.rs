//! API route handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{ApiError, ApiResult, AppState};
use crate::cache::CacheStats;
use crate::engine::scoring;
use crate::reports::{RecentReport, ReportReceipt, ReportStatistics, ReportStatusView, ReportSubmission};
use crate::types::{
    AnalysisRecord, AnalysisSummary, Area, AreaMetrics, Category, ChatMessage, ChatTurn,
    Coordinate, EnvironmentalSnapshot, MetricsRecord, NewArea, ProviderQuery, ProviderResult,
    DEFAULT_IMAGERY_DIM, DEFAULT_RADIUS_KM,
};

/// Session used when a chat request does not name one.
pub const DEFAULT_SESSION: &str = "default";

const DEFAULT_AREA_LIMIT: u32 = 50;
const MAX_AREA_LIMIT: u32 = 100;
const DEFAULT_REPORT_LIMIT: usize = 10;
const AREA_ANALYSES_SHOWN: u32 = 10;

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

fn default_radius() -> f64 {
    DEFAULT_RADIUS_KM
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

/// `?lat&lng&radius_km` (also accepted as `radius`).
#[derive(Debug, Clone, Deserialize)]
pub struct LocationParams {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius", alias = "radius")]
    pub radius_km: f64,
}

impl LocationParams {
    fn query(&self) -> Result<ProviderQuery, ApiError> {
        let location = Coordinate::new(self.lat, self.lng)?;
        Ok(ProviderQuery::validated(location, self.radius_km)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageryParams {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub dim: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsParams {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius", alias = "radius")]
    pub radius_km: f64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatLocationParams {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius", alias = "radius")]
    pub radius_km: f64,
    #[serde(default = "default_session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitParams {
    #[serde(default)]
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub chat_history: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub selected_area_data: Option<AreaMetrics>,
    #[serde(default = "default_session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationChatRequest {
    pub message: String,
    #[serde(default)]
    pub chat_history: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeAreaRequest {
    pub area_data: AreaMetrics,
    #[serde(default)]
    pub area_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeAreaResponse {
    pub analysis: String,
    pub summary: AnalysisSummary,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeLocationRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_radius", alias = "radius")]
    pub radius_km: f64,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeLocationResponse {
    pub analysis: String,
    pub summary: AnalysisSummary,
    pub snapshot: EnvironmentalSnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationEcho {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
}

impl From<&ProviderQuery> for LocationEcho {
    fn from(q: &ProviderQuery) -> Self {
        Self { lat: q.location.lat, lng: q.location.lng, radius_km: q.radius_km }
    }
}

/// One provider result plus the location it was fetched for.
#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
    #[serde(flatten)]
    pub result: ProviderResult,
    pub location: LocationEcho,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveResponse {
    pub success: bool,
    pub data: BTreeMap<String, ProviderResult>,
    pub sources: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub location: LocationEcho,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub api: String,
    pub llm: String,
    pub database: String,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: i64,
    pub services: ServiceStatus,
    pub providers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AreaDetail {
    pub area: Area,
    pub latest_metrics: Option<MetricsRecord>,
    pub analyses: Vec<AnalysisRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheClearResponse {
    pub cleared: usize,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Explicit history from the request, else the session's persisted turns.
async fn resolve_history(
    state: &AppState,
    session_id: &str,
    supplied: Option<Vec<ChatMessage>>,
) -> ApiResult<Vec<ChatMessage>> {
    if let Some(history) = supplied.filter(|h| !h.is_empty()) {
        return Ok(history);
    }
    let limit = state.narrator.settings().history_limit;
    let turns = state
        .store
        .get_recent_chat_turns(session_id, limit.div_ceil(2) as u32)
        .await?;
    Ok(turns.iter().flat_map(ChatTurn::messages).collect())
}

fn require_message(message: &str) -> ApiResult<()> {
    if message.trim().is_empty() {
        return Err(ApiError::validation("message must not be empty"));
    }
    Ok(())
}

async fn require_area(state: &AppState, id: &str) -> ApiResult<Area> {
    state
        .store
        .get_area(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("area {id}")))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.store.ping().await {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            warn!(error = %e, "Database ping failed");
            format!("error: {e}")
        }
    };
    let llm = if state.narrator.model().is_configured() {
        format!("configured ({})", state.narrator.model().model_name())
    } else {
        "not configured".to_string()
    };
    let status = if database == "connected" { "healthy" } else { "degraded" };
    let now = Utc::now();

    Json(HealthResponse {
        status: status.into(),
        timestamp: now,
        uptime_secs: (now - state.started_at).num_seconds(),
        services: ServiceStatus {
            api: "running".into(),
            llm,
            database,
            cache: state.cache.stats(),
        },
        providers: state
            .aggregator
            .registry()
            .sources()
            .into_iter()
            .map(|(c, s)| (c.as_str().to_string(), s))
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Environmental data
// ---------------------------------------------------------------------------

/// GET /api/earth-data/comprehensive
pub async fn comprehensive(
    State(state): State<AppState>,
    Query(params): Query<LocationParams>,
) -> ApiResult<Json<ComprehensiveResponse>> {
    let query = params.query()?;
    let results = state.aggregator.fetch_many(&Category::EARTH_DATA, &query).await;

    let sources = results
        .iter()
        .map(|r| (r.category.as_str().to_string(), r.source.clone()))
        .collect();
    let data = results
        .into_iter()
        .map(|r| (r.category.as_str().to_string(), r))
        .collect();

    Ok(Json(ComprehensiveResponse {
        success: true,
        data,
        sources,
        timestamp: Utc::now(),
        location: LocationEcho::from(&query),
    }))
}

/// GET /api/earth-data/:category
pub async fn earth_data(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(params): Query<LocationParams>,
) -> ApiResult<Json<DataResponse>> {
    let category = category
        .parse::<Category>()
        .ok()
        .filter(|c| Category::EARTH_DATA.contains(c))
        .ok_or_else(|| ApiError::not_found(format!("earth data category {category}")))?;
    let query = params.query()?;
    let result = state.aggregator.registry().fetch(category, &query).await;
    Ok(Json(DataResponse { result, location: LocationEcho::from(&query) }))
}

/// GET /api/air-quality
pub async fn air_quality(
    State(state): State<AppState>,
    Query(params): Query<LocationParams>,
) -> ApiResult<Json<DataResponse>> {
    let query = params.query()?;
    let result = state.aggregator.registry().fetch(Category::AirQuality, &query).await;
    Ok(Json(DataResponse { result, location: LocationEcho::from(&query) }))
}

/// GET /api/nasa/imagery
pub async fn nasa_imagery(
    State(state): State<AppState>,
    Query(params): Query<ImageryParams>,
) -> ApiResult<Json<DataResponse>> {
    let location = Coordinate::new(params.lat, params.lng)?;
    let dim = params.dim.unwrap_or(DEFAULT_IMAGERY_DIM);
    if !(0.01..=0.5).contains(&dim) {
        return Err(ApiError::validation(format!("dim must be within [0.01, 0.5], got {dim}")));
    }
    let query = ProviderQuery::new(location, DEFAULT_RADIUS_KM).with_option("dim", dim);
    let result = state.aggregator.registry().fetch(Category::Imagery, &query).await;
    Ok(Json(DataResponse { result, location: LocationEcho::from(&query) }))
}

/// GET /api/nasa/events
pub async fn nasa_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> ApiResult<Json<DataResponse>> {
    let location = Coordinate::new(params.lat, params.lng)?;
    let mut query = ProviderQuery::validated(location, params.radius_km)?;
    if let Some(status) = params.status {
        if !matches!(status.as_str(), "open" | "closed" | "all") {
            return Err(ApiError::validation(format!(
                "status must be one of open, closed, all; got {status}"
            )));
        }
        query = query.with_option("status", status);
    }
    if let Some(limit) = params.limit {
        if !(1..=100).contains(&limit) {
            return Err(ApiError::validation(format!("limit must be within [1, 100], got {limit}")));
        }
        query = query.with_option("limit", limit);
    }
    let result = state.aggregator.registry().fetch(Category::DisasterEvents, &query).await;
    Ok(Json(DataResponse { result, location: LocationEcho::from(&query) }))
}

// ---------------------------------------------------------------------------
// Chat + analysis
// ---------------------------------------------------------------------------

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    require_message(&req.message)?;
    let history = resolve_history(&state, &req.session_id, req.chat_history).await?;

    let narration = state
        .narrator
        .chat(&req.message, &history, req.selected_area_data.as_ref())
        .await;

    let mut turn = ChatTurn::new(&req.session_id, &req.message, &narration.text, &narration.model);
    turn.context = req
        .selected_area_data
        .as_ref()
        .and_then(|m| serde_json::to_value(m).ok());
    state.store.append_chat_turn(&turn).await?;
    info!(session_id = %req.session_id, fallback = narration.fallback, "Chat turn recorded");

    Ok(Json(ChatResponse { response: narration.text, timestamp: Utc::now() }))
}

/// POST /api/chat-with-location
pub async fn chat_with_location(
    State(state): State<AppState>,
    Query(params): Query<ChatLocationParams>,
    Json(req): Json<LocationChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    require_message(&req.message)?;
    let location = Coordinate::new(params.lat, params.lng)?;
    let query = ProviderQuery::validated(location, params.radius_km)?;
    let history = resolve_history(&state, &params.session_id, req.chat_history).await?;

    let snapshot = state.aggregator.fetch_all(&query).await;
    let summary = scoring::summarize_snapshot(&snapshot);
    let narration = state
        .narrator
        .narrate(&snapshot, &summary, &history, &req.message)
        .await;

    let mut turn = ChatTurn::new(&params.session_id, &req.message, &narration.text, &narration.model);
    turn.context = Some(json!({
        "location": snapshot.location,
        "radius_km": snapshot.radius_km,
        "metrics": snapshot.metrics(),
        "summary": summary,
    }));
    state.store.append_chat_turn(&turn).await?;
    info!(
        session_id = %params.session_id,
        lat = location.lat,
        lng = location.lng,
        priority = %summary.priority_level,
        "Location chat turn recorded"
    );

    Ok(Json(ChatResponse { response: narration.text, timestamp: Utc::now() }))
}

/// POST /api/analyze-area
pub async fn analyze_area(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeAreaRequest>,
) -> ApiResult<Json<AnalyzeAreaResponse>> {
    if let Some(area_id) = &req.area_id {
        require_area(&state, area_id).await?;
    }
    let result = state.narrator.analyze(&req.area_data).await;

    if let Some(area_id) = req.area_id {
        state
            .store
            .save_analysis(&AnalysisRecord {
                id: uuid::Uuid::new_v4().to_string(),
                area_id,
                analysis: result.analysis.clone(),
                summary: result.summary.clone(),
                model: result.model.clone(),
                created_at: Utc::now(),
            })
            .await?;
    }

    Ok(Json(AnalyzeAreaResponse {
        analysis: result.analysis,
        summary: result.summary,
        timestamp: Utc::now(),
    }))
}

/// POST /api/analyze-location
pub async fn analyze_location(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeLocationRequest>,
) -> ApiResult<Json<AnalyzeLocationResponse>> {
    let location = Coordinate::new(req.lat, req.lng)?;
    let query = ProviderQuery::validated(location, req.radius_km)?;
    if let Some(area_id) = &req.area_id {
        require_area(&state, area_id).await?;
    }

    let snapshot = state.aggregator.fetch_all(&query).await;
    let metrics = snapshot.metrics();
    let result = state.narrator.analyze(&metrics).await;

    if let Some(area_id) = &req.area_id {
        state
            .store
            .save_metrics(&MetricsRecord::from_snapshot(area_id, &snapshot))
            .await?;
        state
            .store
            .save_analysis(&AnalysisRecord {
                id: uuid::Uuid::new_v4().to_string(),
                area_id: area_id.clone(),
                analysis: result.analysis.clone(),
                summary: result.summary.clone(),
                model: result.model.clone(),
                created_at: Utc::now(),
            })
            .await?;
    }

    if let Some(session_id) = &req.session_id {
        let prompt = format!("Analyze location {location}");
        let mut turn = ChatTurn::new(session_id, prompt, &result.analysis, &result.model);
        turn.area_id = req.area_id.clone();
        turn.context = serde_json::to_value(&metrics).ok();
        state.store.append_chat_turn(&turn).await?;
    }

    info!(
        lat = location.lat,
        lng = location.lng,
        radius_km = query.radius_km,
        priority = %result.summary.priority_level,
        failed = snapshot.failed_categories().len(),
        "Location analysed"
    );

    Ok(Json(AnalyzeLocationResponse {
        analysis: result.analysis,
        summary: result.summary,
        snapshot,
        timestamp: Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// Areas
// ---------------------------------------------------------------------------

/// POST /api/areas
pub async fn create_area(
    State(state): State<AppState>,
    Json(req): Json<NewArea>,
) -> ApiResult<(StatusCode, Json<Area>)> {
    let area = Area::from_request(req)?;
    state.store.save_area(&area).await?;
    info!(area_id = %area.id, name = %area.name, area_km2 = area.area_km2, "Area created");
    Ok((StatusCode::CREATED, Json(area)))
}

/// GET /api/areas
pub async fn list_areas(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<Area>>> {
    let limit = params.limit.unwrap_or(DEFAULT_AREA_LIMIT).clamp(1, MAX_AREA_LIMIT);
    Ok(Json(state.store.list_areas(limit).await?))
}

/// GET /api/areas/:id
pub async fn get_area(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<AreaDetail>> {
    let area = require_area(&state, &id).await?;
    let latest_metrics = state.store.latest_metrics(&id).await?;
    let analyses = state.store.list_analyses(&id, AREA_ANALYSES_SHOWN).await?;
    Ok(Json(AreaDetail { area, latest_metrics, analyses }))
}

/// DELETE /api/areas/:id
pub async fn delete_area(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_area(&id).await? {
        info!(area_id = %id, "Area deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("area {id}")))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// POST /api/reports/submit
pub async fn submit_report(
    State(state): State<AppState>,
    Json(submission): Json<ReportSubmission>,
) -> ApiResult<Json<ReportReceipt>> {
    Ok(Json(state.reports.submit(submission).await?))
}

/// GET /api/reports/status/:id
pub async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ReportStatusView>> {
    Ok(Json(state.reports.status(&id).await?))
}

/// GET /api/reports/statistics
pub async fn report_statistics(State(state): State<AppState>) -> Json<ReportStatistics> {
    Json(state.reports.statistics().await)
}

/// GET /api/reports/recent
pub async fn recent_reports(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<RecentReport>> {
    let limit = params.limit.map(|l| l as usize).unwrap_or(DEFAULT_REPORT_LIMIT);
    Json(state.reports.recent(limit).await)
}

// ---------------------------------------------------------------------------
// Cache maintenance
// ---------------------------------------------------------------------------

/// POST /api/cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheClearResponse> {
    let cleared = state.cache.clear_all().await;
    info!(cleared, "Provider cache cleared");
    Json(CacheClearResponse { cleared, timestamp: Utc::now() })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
