//! OpenRouter LLM integration.
//!
//! Routes all LLM calls through OpenRouter's unified API, giving access to
//! multiple model providers with a single API key. Uses the OpenAI-compatible
//! chat completions format.
//!
//! Primary model: configured `[llm].model` (a free DeepSeek chat model by
//! default). Fallback model: optional `[llm].fallback_model`, tried once the
//! primary has exhausted its retries. Retries and the fallback model all
//! share one `[llm].budget_secs` deadline per completion.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChatModel, Completion, CompletionRequest};
use crate::config::LlmConfig;
use crate::types::{ChatMessage, EchoError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Maximum retries on rate limit / server errors per model attempt.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Cost tables (approximate per-1K-token pricing via OpenRouter)
// ---------------------------------------------------------------------------

/// Returns (input_cost_per_1k, output_cost_per_1k) in USD for known models.
fn model_costs(model: &str) -> (Decimal, Decimal) {
    match model {
        // Free-tier routes
        m if m.ends_with(":free") => (Decimal::ZERO, Decimal::ZERO),
        m if m.contains("deepseek") => (dec!(0.00027), dec!(0.0011)),
        m if m.contains("claude") && m.contains("haiku") => (dec!(0.0008), dec!(0.004)),
        m if m.contains("claude") => (dec!(0.003), dec!(0.015)),
        m if m.contains("gpt-4o-mini") => (dec!(0.00015), dec!(0.0006)),
        m if m.contains("gpt-4o") => (dec!(0.005), dec!(0.015)),
        m if m.contains("llama") => (dec!(0.0002), dec!(0.0002)),
        // Conservative default
        _ => (dec!(0.005), dec!(0.015)),
    }
}

fn call_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> Decimal {
    let (input_cost, output_cost) = model_costs(model);
    Decimal::from(prompt_tokens) / dec!(1000) * input_cost
        + Decimal::from(completion_tokens) / dec!(1000) * output_cost
}

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    endpoint: String,
    primary_model: String,
    fallback_model: Option<String>,
    site_url: String,
    site_name: String,
    backoff_ms: u64,
    budget: Duration,
    total_cost_micros: AtomicU64,
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client from the `[llm]` section.
    pub fn new(api_key: SecretString, config: &LlmConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            primary_model: config.model.clone(),
            fallback_model: config.fallback_model.clone().filter(|m| !m.trim().is_empty()),
            site_url: config.site_url.clone(),
            site_name: config.site_name.clone(),
            backoff_ms: BASE_BACKOFF_MS,
            budget: Duration::from_secs(config.budget_secs.max(1)),
            total_cost_micros: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Override the base retry delay.
    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    /// Override the overall deadline of one completion.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Send a chat completion request for a specific model, with retry +
    /// exponential backoff on 429 and 5xx.
    async fn call_model(&self, model: &str, request: &CompletionRequest) -> Result<Completion> {
        let body = ChatRequest {
            model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff_ms * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model, "Retrying OpenRouter API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(self.api_key.expose_secret())
                .header("HTTP-Referer", &self.site_url)
                .header("X-Title", &self.site_name)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;
                        return self.completion_from(model, parsed);
                    }

                    // Retryable errors: 429 (rate limit), 5xx
                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(
                            status = %status,
                            attempt,
                            model,
                            error = %error_text,
                            "Retryable OpenRouter error"
                        );
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    return Err(EchoError::Llm {
                        model: model.to_string(),
                        message: format!("HTTP {status}: {error_text}"),
                    }
                    .into());
                }
                Err(e) => {
                    warn!(attempt, model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        Err(EchoError::Llm {
            model: model.to_string(),
            message: format!(
                "failed after {MAX_RETRIES} retries: {}",
                last_error.unwrap_or_default()
            ),
        }
        .into())
    }

    fn completion_from(&self, requested_model: &str, body: ChatResponse) -> Result<Completion> {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EchoError::Llm {
                model: requested_model.to_string(),
                message: "response contained no message content".into(),
            })?;

        let usage = body.usage.unwrap_or_default();
        // Use the actual model returned (may differ from requested)
        let model = body.model.unwrap_or_else(|| requested_model.to_string());
        let cost = call_cost(&model, usage.prompt_tokens, usage.completion_tokens);

        let micros = (cost * dec!(1_000_000)).trunc().to_u64().unwrap_or(0);
        self.total_cost_micros.fetch_add(micros, Ordering::Relaxed);
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        info!(
            model = %model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost = %cost,
            "LLM completion"
        );

        Ok(Completion {
            text,
            model,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost,
        })
    }

    /// Total cumulative cost across all calls, in USD.
    pub fn cumulative_cost(&self) -> Decimal {
        Decimal::from(self.total_cost_micros.load(Ordering::Relaxed)) / dec!(1_000_000)
    }

    /// Total number of successful API calls.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ChatModel implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ChatModel for OpenRouterClient {
    /// Call the primary model, then the fallback model if configured, all
    /// within the completion budget.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        match tokio::time::timeout(self.budget, self.complete_unbounded(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(model = %self.primary_model, budget_ms = self.budget.as_millis() as u64, "LLM budget exhausted");
                Err(EchoError::Llm {
                    model: self.primary_model.clone(),
                    message: format!("timed out after {:.1}s", self.budget.as_secs_f64()),
                }
                .into())
            }
        }
    }

    fn model_name(&self) -> String {
        self.primary_model.clone()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

impl OpenRouterClient {
    async fn complete_unbounded(&self, request: &CompletionRequest) -> Result<Completion> {
        match self.call_model(&self.primary_model, request).await {
            Ok(completion) => Ok(completion),
            Err(primary_err) => {
                if let Some(ref fallback) = self.fallback_model {
                    warn!(
                        primary = %self.primary_model,
                        fallback = %fallback,
                        error = %primary_err,
                        "Primary model failed, falling back"
                    );
                    self.call_model(fallback, request).await.with_context(|| {
                        format!(
                            "Both primary ({}) and fallback ({}) models failed. Primary error: {}",
                            self.primary_model, fallback, primary_err
                        )
                    })
                } else {
                    Err(primary_err)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
