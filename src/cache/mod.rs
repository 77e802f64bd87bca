//! In-memory TTL cache for upstream provider payloads.
//!
//! Entries are keyed by a deterministic [`CacheKey`] built from the API
//! source and its request parameters. Expiry is lazy on read; a periodic
//! sweep ([`TtlCache::purge_expired`]) removes entries nobody asks for
//! again. Time is read through a [`Clock`] so expiry can be tested without
//! sleeping.

pub mod tiered;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::types::round_coord;

pub use tiered::{ProviderCache, SweepReport};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock shared between the cache tiers and the sweep task.
pub type SharedClock = Arc<dyn Clock>;

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// Deterministic identity of an upstream request.
///
/// Parameters are kept in sorted order and coordinates are rounded to four
/// decimals, so two requests for the same place always share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    api_source: String,
    params: BTreeMap<String, Value>,
}

impl CacheKey {
    pub fn new(api_source: impl Into<String>) -> Self {
        Self { api_source: api_source.into(), params: BTreeMap::new() }
    }

    /// Build a key from a parameter map (order does not matter).
    pub fn from_params(api_source: impl Into<String>, params: Map<String, Value>) -> Self {
        Self { api_source: api_source.into(), params: params.into_iter().collect() }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Add a coordinate component, rounded to four decimals.
    pub fn coord(self, name: impl Into<String>, value: f64) -> Self {
        self.param(name, round_coord(value))
    }

    pub fn api_source(&self) -> &str {
        &self.api_source
    }

    /// Request parameters as a JSON object with sorted keys.
    pub fn params_json(&self) -> Value {
        Value::Object(self.params.clone().into_iter().collect())
    }

    /// String form: `"{api_source}:{sorted params json}"`.
    pub fn as_string(&self) -> String {
        let params = serde_json::to_string(&self.params).unwrap_or_default();
        format!("{}:{}", self.api_source, params)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_string())
    }
}

// ---------------------------------------------------------------------------
// TTL cache
// ---------------------------------------------------------------------------

/// A cached payload with its lifetime bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Counters reported by the health and cache endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Concurrent TTL cache keyed by string.
pub struct TtlCache<C: Clock = SystemClock> {
    entries: DashMap<String, CacheEntry>,
    clock: C,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TtlCache<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TtlCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TtlCache<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Return a live value, counting the hit. Expired entries are dropped
    /// and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.get_uncounted(key);
        self.record(value.is_some());
        value
    }

    /// Like [`TtlCache::get`] but leaves the hit/miss counters alone, for
    /// callers that consult another tier before deciding the outcome.
    pub fn get_uncounted(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.hit_count += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        None
    }

    /// Count one lookup outcome.
    pub fn record(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Store a value for `ttl`. A zero or negative TTL stores nothing.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        if ttl <= Duration::zero() {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        self.set_until(key, value, expires_at);
    }

    /// Store a value with an absolute expiry, e.g. when promoting a row
    /// from the persistent tier.
    pub fn set_until(&self, key: &str, value: Value, expires_at: DateTime<Utc>) {
        let now = self.clock.now();
        if expires_at <= now {
            return;
        }
        self.entries
            .entry(key.to_string())
            .and_modify(|e| {
                e.value = value.clone();
                e.created_at = now;
                e.expires_at = expires_at;
            })
            .or_insert_with(|| CacheEntry {
                key: key.to_string(),
                value,
                created_at: now,
                expires_at,
                hit_count: 0,
            });
    }

    /// Peek at an entry without touching counters or expiry.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
