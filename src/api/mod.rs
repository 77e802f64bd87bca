//! HTTP API: Axum router over the analysis pipeline.
//!
//! All endpoints return JSON. Shared services live in [`AppContext`],
//! handed to handlers as `State<AppState>`.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::cache::ProviderCache;
use crate::engine::{Aggregator, Narrator};
use crate::reports::ReportDesk;
use crate::storage::Store;
use crate::types::EchoError;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Services shared by every handler.
pub struct AppContext {
    pub aggregator: Aggregator,
    pub narrator: Arc<Narrator>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<ProviderCache>,
    pub reports: ReportDesk,
    /// Allowed CORS origin; `None` or `"*"` allows any.
    pub cors_origin: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    pub fn new(
        aggregator: Aggregator,
        narrator: Arc<Narrator>,
        store: Arc<dyn Store>,
        cache: Arc<ProviderCache>,
    ) -> Self {
        Self {
            aggregator,
            reports: ReportDesk::new(Some(narrator.clone())),
            narrator,
            store,
            cache,
            cors_origin: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_cors_origin(mut self, origin: Option<String>) -> Self {
        self.cors_origin = origin;
        self
    }
}

pub type AppState = Arc<AppContext>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error returned by handlers, rendered as `{"detail": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Domain(EchoError),
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Domain(EchoError::Validation(message.into()))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Domain(EchoError::NotFound(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Domain(EchoError::Validation(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Domain(EchoError::NotFound(_)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EchoError> for ApiError {
    fn from(e: EchoError) -> Self {
        ApiError::Domain(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<EchoError>() {
            Ok(domain) => ApiError::Domain(domain),
            Err(other) => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Domain(e) => e.to_string(),
            ApiError::Internal(e) => format!("{e:#}"),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %detail, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %detail, "Request rejected");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    match origin.filter(|o| *o != "*").map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(e)) => {
            warn!(error = %e, "Invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(state.cors_origin.as_deref());

    Router::new()
        .route("/api/health", get(routes::health))
        // Environmental data
        .route("/api/earth-data/comprehensive", get(routes::comprehensive))
        .route("/api/earth-data/:category", get(routes::earth_data))
        .route("/api/air-quality", get(routes::air_quality))
        .route("/api/nasa/imagery", get(routes::nasa_imagery))
        .route("/api/nasa/events", get(routes::nasa_events))
        // Chat + analysis
        .route("/api/chat", post(routes::chat))
        .route("/api/chat-with-location", post(routes::chat_with_location))
        .route("/api/analyze-area", post(routes::analyze_area))
        .route("/api/analyze-location", post(routes::analyze_location))
        // Areas
        .route("/api/areas", post(routes::create_area).get(routes::list_areas))
        .route("/api/areas/:id", get(routes::get_area).delete(routes::delete_area))
        // Reports
        .route("/api/reports/submit", post(routes::submit_report))
        .route("/api/reports/status/:id", get(routes::report_status))
        .route("/api/reports/statistics", get(routes::report_statistics))
        .route("/api/reports/recent", get(routes::recent_reports))
        // Maintenance
        .route("/api/cache/clear", post(routes::clear_cache))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(ApiError::validation("bad").status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(EchoError::Storage("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_anyhow_downcasts_domain_errors() {
        let e: anyhow::Error = EchoError::NotFound("area 1".into()).into();
        assert_eq!(ApiError::from(e).status(), StatusCode::NOT_FOUND);

        let e = anyhow::anyhow!("connection refused");
        assert_eq!(ApiError::from(e).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_body_has_detail() {
        let resp = ApiError::validation("latitude out of range").into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Validation error: latitude out of range");
    }
}
