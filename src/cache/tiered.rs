//! Two-tier provider cache: the in-memory [`TtlCache`] in front of the
//! `api_cache` table.
//!
//! Reads try memory first, then the persistent tier; a live row is promoted
//! into memory with its original expiry. Writes go to both tiers. Failures
//! of the persistent tier are logged and treated as a miss so a broken
//! database never takes provider data down with it.

use chrono::Duration;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{CacheKey, CacheStats, SharedClock, SystemClock, TtlCache};
use crate::storage::Store;

/// Result of one maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory_purged: usize,
    pub rows_deleted: u64,
}

pub struct ProviderCache {
    memory: TtlCache<SharedClock>,
    store: Option<Arc<dyn Store>>,
}

impl ProviderCache {
    pub fn new(clock: SharedClock, store: Option<Arc<dyn Store>>) -> Self {
        Self { memory: TtlCache::with_clock(clock), store }
    }

    /// Memory-only cache on the wall clock.
    pub fn memory_only() -> Self {
        Self::new(Arc::new(SystemClock), None)
    }

    pub fn memory(&self) -> &TtlCache<SharedClock> {
        &self.memory
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Look a key up in memory, then in the persistent tier. Counts one hit
    /// or one miss for the whole lookup.
    pub async fn get(&self, key: &CacheKey) -> Option<Value> {
        let value = self.lookup(key).await;
        self.memory.record(value.is_some());
        value
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let key_str = key.as_string();
        if let Some(value) = self.memory.get_uncounted(&key_str) {
            debug!(cache_key = %key_str, tier = "memory", "Cache hit");
            return Some(value);
        }

        let store = self.store.as_ref()?;
        let row = match store.get_cache_row(&key_str).await {
            Ok(row) => row?,
            Err(e) => {
                warn!(cache_key = %key_str, error = %e, "Persistent cache read failed");
                return None;
            }
        };

        if !row.is_valid || row.expires_at < self.memory.now() {
            debug!(cache_key = %key_str, "Persistent cache row expired");
            return None;
        }

        debug!(cache_key = %key_str, tier = "database", "Cache hit");
        self.memory.set_until(&key_str, row.response_data.clone(), row.expires_at);
        Some(row.response_data)
    }

    /// Write to both tiers. A zero or negative TTL writes nothing.
    pub async fn set(&self, key: &CacheKey, value: Value, ttl: Duration) {
        if ttl <= Duration::zero() {
            return;
        }
        let key_str = key.as_string();
        let expires_at = self.memory.now() + ttl;

        if let Some(store) = &self.store {
            if let Err(e) = store
                .upsert_cache_row(&key_str, key.api_source(), &key.params_json(), &value, expires_at)
                .await
            {
                warn!(cache_key = %key_str, error = %e, "Persistent cache write failed");
            }
        }

        self.memory.set_until(&key_str, value, expires_at);
        debug!(cache_key = %key_str, ttl_secs = ttl.num_seconds(), "Cached");
    }

    /// Remove one key from memory. Persistent rows are left to expire.
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.memory.delete(&key.as_string())
    }

    /// Empty both tiers. Returns the number of in-memory entries dropped.
    pub async fn clear_all(&self) -> usize {
        let cleared = self.memory.clear_all();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_cache_rows().await {
                warn!(error = %e, "Failed to clear persistent cache");
            }
        }
        cleared
    }

    /// Purge expired entries from both tiers.
    pub async fn sweep(&self) -> SweepReport {
        let memory_purged = self.memory.purge_expired();
        let rows_deleted = match &self.store {
            Some(store) => match store.delete_expired_cache_rows(self.memory.now()).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Failed to delete expired cache rows");
                    0
                }
            },
            None => 0,
        };
        SweepReport { memory_purged, rows_deleted }
    }

    pub fn stats(&self) -> CacheStats {
        self.memory.stats()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
