//! SQLite implementation of [`Store`] on a sqlx connection pool.
//!
//! Queries are plain runtime-checked SQL. JSON columns hold serialised
//! `serde_json::Value`s and timestamps are RFC 3339 text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::Store;
use crate::types::{AnalysisRecord, Area, CacheRow, ChatTurn, MetricsRecord};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS areas (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        boundary TEXT NOT NULL,
        center_lat REAL NOT NULL,
        center_lng REAL NOT NULL,
        area_km2 REAL NOT NULL,
        city TEXT,
        country TEXT,
        description TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS environmental_metrics (
        id TEXT PRIMARY KEY,
        area_id TEXT NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
        heat_index REAL NOT NULL,
        air_quality_index INTEGER NOT NULL,
        green_coverage REAL NOT NULL,
        water_stress REAL,
        flood_risk TEXT NOT NULL,
        population_estimate INTEGER,
        humidity REAL,
        wind_speed REAL,
        precipitation REAL,
        data_source TEXT,
        recorded_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS area_analyses (
        id TEXT PRIMARY KEY,
        area_id TEXT NOT NULL REFERENCES areas(id) ON DELETE CASCADE,
        analysis TEXT NOT NULL,
        summary TEXT NOT NULL,
        model TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chat_history (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        area_id TEXT REFERENCES areas(id) ON DELETE CASCADE,
        user_message TEXT NOT NULL,
        ai_response TEXT NOT NULL,
        context TEXT,
        model TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS api_cache (
        id TEXT PRIMARY KEY,
        cache_key TEXT NOT NULL UNIQUE,
        api_source TEXT NOT NULL,
        request_params TEXT NOT NULL,
        response_data TEXT NOT NULL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        is_valid INTEGER NOT NULL DEFAULT 1
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_metrics_area ON environmental_metrics(area_id, recorded_at)",
    "CREATE INDEX IF NOT EXISTS idx_analyses_area ON area_analyses(area_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_chat_session ON chat_history(session_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_cache_expires ON api_cache(expires_at)",
];

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database {url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, max_connections, "Database ready");
        Ok(store)
    }

    /// Private in-memory database. One connection so every query sees
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory database URL")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply database schema")?;
        }
        debug!(statements = SCHEMA.len(), "Schema applied");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

/// Fixed-width UTC timestamps so text comparison matches time order.
fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    let parsed = DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("Invalid timestamp in {column}: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn json(row: &SqliteRow, column: &str) -> Result<Value> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {column}"))
}

fn area_from_row(row: &SqliteRow) -> Result<Area> {
    Ok(Area {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        boundary: serde_json::from_value(json(row, "boundary")?)
            .context("Invalid area boundary")?,
        center: crate::types::Coordinate {
            lat: row.try_get("center_lat")?,
            lng: row.try_get("center_lng")?,
        },
        area_km2: row.try_get("area_km2")?,
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        description: row.try_get("description")?,
        created_at: ts(row, "created_at")?,
    })
}

fn metrics_from_row(row: &SqliteRow) -> Result<MetricsRecord> {
    let flood_risk: String = row.try_get("flood_risk")?;
    let aqi: i64 = row.try_get("air_quality_index")?;
    let population: Option<i64> = row.try_get("population_estimate")?;
    Ok(MetricsRecord {
        id: row.try_get("id")?,
        area_id: row.try_get("area_id")?,
        heat_index: row.try_get("heat_index")?,
        air_quality_index: u32::try_from(aqi).context("air_quality_index out of range")?,
        green_coverage: row.try_get("green_coverage")?,
        water_stress: row.try_get("water_stress")?,
        flood_risk: flood_risk.parse()?,
        population_estimate: population.map(|p| p.max(0) as u64),
        humidity: row.try_get("humidity")?,
        wind_speed: row.try_get("wind_speed")?,
        precipitation: row.try_get("precipitation")?,
        data_source: row.try_get("data_source")?,
        recorded_at: ts(row, "recorded_at")?,
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<AnalysisRecord> {
    Ok(AnalysisRecord {
        id: row.try_get("id")?,
        area_id: row.try_get("area_id")?,
        analysis: row.try_get("analysis")?,
        summary: serde_json::from_value(json(row, "summary")?)
            .context("Invalid analysis summary")?,
        model: row.try_get("model")?,
        created_at: ts(row, "created_at")?,
    })
}

fn chat_turn_from_row(row: &SqliteRow) -> Result<ChatTurn> {
    let context: Option<String> = row.try_get("context")?;
    Ok(ChatTurn {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        area_id: row.try_get("area_id")?,
        user_message: row.try_get("user_message")?,
        ai_response: row.try_get("ai_response")?,
        context: context.map(|c| serde_json::from_str(&c)).transpose()?,
        model: row.try_get("model")?,
        created_at: ts(row, "created_at")?,
    })
}

fn cache_row_from_row(row: &SqliteRow) -> Result<CacheRow> {
    let is_valid: i64 = row.try_get("is_valid")?;
    Ok(CacheRow {
        id: row.try_get("id")?,
        cache_key: row.try_get("cache_key")?,
        api_source: row.try_get("api_source")?,
        request_params: json(row, "request_params")?,
        response_data: json(row, "response_data")?,
        fetched_at: ts(row, "fetched_at")?,
        expires_at: ts(row, "expires_at")?,
        is_valid: is_valid != 0,
    })
}

// ---------------------------------------------------------------------------
// Store impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for SqliteStore {
    async fn save_area(&self, area: &Area) -> Result<()> {
        let boundary = serde_json::to_string(&area.boundary)?;
        sqlx::query(
            r#"INSERT INTO areas
               (id, name, boundary, center_lat, center_lng, area_km2, city, country, description, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 boundary = excluded.boundary,
                 center_lat = excluded.center_lat,
                 center_lng = excluded.center_lng,
                 area_km2 = excluded.area_km2,
                 city = excluded.city,
                 country = excluded.country,
                 description = excluded.description"#,
        )
        .bind(&area.id)
        .bind(&area.name)
        .bind(boundary)
        .bind(area.center.lat)
        .bind(area.center.lng)
        .bind(area.area_km2)
        .bind(&area.city)
        .bind(&area.country)
        .bind(&area.description)
        .bind(stamp(area.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save area {}", area.id))?;

        debug!(area_id = %area.id, name = %area.name, "Area saved");
        Ok(())
    }

    async fn get_area(&self, id: &str) -> Result<Option<Area>> {
        let row = sqlx::query("SELECT * FROM areas WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load area {id}"))?;
        row.as_ref().map(area_from_row).transpose()
    }

    async fn list_areas(&self, limit: u32) -> Result<Vec<Area>> {
        let rows = sqlx::query("SELECT * FROM areas ORDER BY created_at DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list areas")?;
        rows.iter().map(area_from_row).collect()
    }

    async fn delete_area(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM areas WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete area {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_metrics(&self, record: &MetricsRecord) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO environmental_metrics
               (id, area_id, heat_index, air_quality_index, green_coverage, water_stress,
                flood_risk, population_estimate, humidity, wind_speed, precipitation,
                data_source, recorded_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.id)
        .bind(&record.area_id)
        .bind(record.heat_index)
        .bind(i64::from(record.air_quality_index))
        .bind(record.green_coverage)
        .bind(record.water_stress)
        .bind(record.flood_risk.as_str())
        .bind(record.population_estimate.map(|p| p.min(i64::MAX as u64) as i64))
        .bind(record.humidity)
        .bind(record.wind_speed)
        .bind(record.precipitation)
        .bind(&record.data_source)
        .bind(stamp(record.recorded_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save metrics for area {}", record.area_id))?;
        Ok(())
    }

    async fn latest_metrics(&self, area_id: &str) -> Result<Option<MetricsRecord>> {
        let row = sqlx::query(
            "SELECT * FROM environmental_metrics WHERE area_id = ? ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(area_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load metrics for area {area_id}"))?;
        row.as_ref().map(metrics_from_row).transpose()
    }

    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let summary = serde_json::to_string(&record.summary)?;
        sqlx::query(
            r#"INSERT INTO area_analyses (id, area_id, analysis, summary, model, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&record.id)
        .bind(&record.area_id)
        .bind(&record.analysis)
        .bind(summary)
        .bind(&record.model)
        .bind(stamp(record.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save analysis for area {}", record.area_id))?;
        Ok(())
    }

    async fn list_analyses(&self, area_id: &str, limit: u32) -> Result<Vec<AnalysisRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM area_analyses WHERE area_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(area_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list analyses for area {area_id}"))?;
        rows.iter().map(analysis_from_row).collect()
    }

    async fn append_chat_turn(&self, turn: &ChatTurn) -> Result<()> {
        let context = turn.context.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r#"INSERT INTO chat_history
               (id, session_id, area_id, user_message, ai_response, context, model, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&turn.id)
        .bind(&turn.session_id)
        .bind(&turn.area_id)
        .bind(&turn.user_message)
        .bind(&turn.ai_response)
        .bind(context)
        .bind(&turn.model)
        .bind(stamp(turn.created_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to append chat turn to session {}", turn.session_id))?;
        Ok(())
    }

    async fn get_recent_chat_turns(&self, session_id: &str, limit: u32) -> Result<Vec<ChatTurn>> {
        // rowid breaks ties between turns written within the same instant.
        let rows = sqlx::query(
            r#"SELECT * FROM chat_history WHERE session_id = ?
               ORDER BY created_at DESC, rowid DESC LIMIT ?"#,
        )
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load chat history for session {session_id}"))?;

        let mut turns = rows.iter().map(chat_turn_from_row).collect::<Result<Vec<_>>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn get_cache_row(&self, cache_key: &str) -> Result<Option<CacheRow>> {
        let row = sqlx::query("SELECT * FROM api_cache WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read cache row")?;
        row.as_ref().map(cache_row_from_row).transpose()
    }

    async fn upsert_cache_row(
        &self,
        cache_key: &str,
        api_source: &str,
        request_params: &Value,
        response_data: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO api_cache
               (id, cache_key, api_source, request_params, response_data, fetched_at, expires_at, is_valid)
               VALUES (?, ?, ?, ?, ?, ?, ?, 1)
               ON CONFLICT(cache_key) DO UPDATE SET
                 api_source = excluded.api_source,
                 request_params = excluded.request_params,
                 response_data = excluded.response_data,
                 fetched_at = excluded.fetched_at,
                 expires_at = excluded.expires_at,
                 is_valid = 1"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(cache_key)
        .bind(api_source)
        .bind(serde_json::to_string(request_params)?)
        .bind(serde_json::to_string(response_data)?)
        .bind(stamp(Utc::now()))
        .bind(stamp(expires_at))
        .execute(&self.pool)
        .await
        .context("Failed to write cache row")?;
        Ok(())
    }

    async fn delete_expired_cache_rows(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_cache WHERE expires_at < ?")
            .bind(stamp(now))
            .execute(&self.pool)
            .await
            .context("Failed to delete expired cache rows")?;
        Ok(result.rows_affected())
    }

    async fn clear_cache_rows(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM api_cache")
            .execute(&self.pool)
            .await
            .context("Failed to clear cache rows")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
