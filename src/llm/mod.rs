//! LLM integration for narrative analysis and chat.
//!
//! Defines the `ChatModel` trait and the OpenRouter implementation. When
//! no API key is configured, [`UnconfiguredModel`] stands in and every
//! call fails, which the narrative layer turns into its fallback text.

pub mod openrouter;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{ChatMessage, EchoError};

pub use openrouter::OpenRouterClient;

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Model output plus usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Approximate USD cost of the call.
    pub cost: Decimal,
}

/// Abstraction over chat-completion backends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Model identifier string.
    fn model_name(&self) -> String;

    /// Whether the backend has credentials and can be called at all.
    fn is_configured(&self) -> bool;
}

/// Placeholder backend used when no API key is available.
#[derive(Debug, Clone)]
pub struct UnconfiguredModel {
    model: String,
}

impl UnconfiguredModel {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl ChatModel for UnconfiguredModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        Err(EchoError::Llm {
            model: self.model.clone(),
            message: "no API key configured".into(),
        }
        .into())
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn is_configured(&self) -> bool {
        false
    }
}
