//! Deterministic stand-ins for the LLM and upstream providers.
//!
//! Everything is in-memory and fully controllable from test code, so the
//! pipeline can be exercised end to end with no network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use echosphere::cache::CacheKey;
use echosphere::data::{query_cache_key, SyntheticProvider, Upstream};
use echosphere::llm::{ChatModel, Completion, CompletionRequest};
use echosphere::types::{Category, EnvironmentalData, ProviderQuery};

/// A chat model that answers with a fixed reply and records every request.
pub struct StubModel {
    reply: String,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// If set, every completion fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl StubModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(msg: &str) -> Self {
        let model = Self::new("");
        model.set_error(msg);
        model
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for StubModel {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(Completion {
            text: self.reply.clone(),
            model: "stub-model".into(),
            prompt_tokens: 100,
            completion_tokens: 50,
            cost: Decimal::ZERO,
        })
    }

    fn model_name(&self) -> String {
        "stub-model".into()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

/// An upstream that always fails, counting how often it was asked.
pub struct FailingUpstream {
    category: Category,
    message: String,
    calls: Arc<AtomicUsize>,
}

impl FailingUpstream {
    pub fn new(category: Category, message: &str) -> Self {
        Self {
            category,
            message: message.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Upstream for FailingUpstream {
    fn category(&self) -> Category {
        self.category
    }

    fn source(&self) -> String {
        format!("Failing {}", self.category)
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        query_cache_key(&format!("failing_{}", self.category), query)
    }

    async fn fetch(&self, _query: &ProviderQuery) -> Result<EnvironmentalData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("{}", self.message))
    }
}

/// Synthetic data behind a call counter, for cache hit/miss assertions.
pub struct CountingUpstream {
    inner: SyntheticProvider,
    calls: Arc<AtomicUsize>,
}

impl CountingUpstream {
    pub fn new(category: Category) -> Self {
        Self {
            inner: SyntheticProvider::new(category),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Upstream for CountingUpstream {
    fn category(&self) -> Category {
        self.inner.category()
    }

    fn source(&self) -> String {
        self.inner.source()
    }

    fn cache_key(&self, query: &ProviderQuery) -> CacheKey {
        self.inner.cache_key(query)
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<EnvironmentalData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(query).await
    }
}
