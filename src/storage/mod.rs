//! Persistence layer.
//!
//! The rest of the crate only talks to storage through the [`Store`]
//! trait; [`SqliteStore`] is the production implementation. Deleting an
//! area cascades to its metrics, analyses and chat turns.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{AnalysisRecord, Area, CacheRow, ChatTurn, MetricsRecord};

pub use sqlite::SqliteStore;

/// Persistence contract used by the core.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_area(&self, area: &Area) -> Result<()>;

    async fn get_area(&self, id: &str) -> Result<Option<Area>>;

    async fn list_areas(&self, limit: u32) -> Result<Vec<Area>>;

    /// Returns false when no area had this id.
    async fn delete_area(&self, id: &str) -> Result<bool>;

    async fn save_metrics(&self, record: &MetricsRecord) -> Result<()>;

    async fn latest_metrics(&self, area_id: &str) -> Result<Option<MetricsRecord>>;

    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<()>;

    async fn list_analyses(&self, area_id: &str, limit: u32) -> Result<Vec<AnalysisRecord>>;

    async fn append_chat_turn(&self, turn: &ChatTurn) -> Result<()>;

    /// Most recent turns of a session, oldest first.
    async fn get_recent_chat_turns(&self, session_id: &str, limit: u32) -> Result<Vec<ChatTurn>>;

    async fn get_cache_row(&self, cache_key: &str) -> Result<Option<CacheRow>>;

    async fn upsert_cache_row(
        &self,
        cache_key: &str,
        api_source: &str,
        request_params: &Value,
        response_data: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete rows whose expiry is before `now`. Returns rows removed.
    async fn delete_expired_cache_rows(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn clear_cache_rows(&self) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}
