//! Provider clients
//!
//! A [`ProviderClient`] performs exactly one network call for one model and
//! turns the provider's reply into a [`ProviderResponse`]. It never retries
//! and never writes to storage; both are the dispatcher's job.
//!
//! Two wire styles are spoken by [`HttpProviderClient`]:
//! - OpenAI-compatible `/chat/completions` ([`openai`])
//! - Anthropic-style `/messages` ([`anthropic`])

mod accumulator;
pub mod anthropic;
mod classify;
mod http;
pub mod openai;

pub use accumulator::StreamAccumulator;
pub use classify::classify_http_error;
pub use http::HttpProviderClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::types::{ModelTarget, Prompt, ResponseContent, Usage};

/// How a thinking segment is surfaced in the final content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    /// Thinking text is prepended to the answer in a single plain text.
    #[default]
    Concatenate,
    /// Thinking and answer are kept apart.
    Separate,
}

/// OpenAI-style reasoning effort hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Per-call request options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendOptions {
    pub stream: bool,
    #[serde(default)]
    pub thinking_mode: ThinkingMode,
    pub max_tokens: Option<u32>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Token budget for Anthropic-style extended thinking.
    pub thinking_budget: Option<u32>,
    /// Overrides the profile timeout.
    pub timeout: Option<Duration>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streaming() -> Self {
        Self::default().with_stream(true)
    }

    pub const fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub const fn with_thinking_mode(mut self, mode: ThinkingMode) -> Self {
        self.thinking_mode = mode;
        self
    }

    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub const fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub const fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Effective timeout for `target`.
    pub fn timeout_for(&self, target: &ModelTarget) -> Duration {
        self.timeout.unwrap_or_else(|| target.profile().timeout())
    }
}

/// What one successful call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: ResponseContent,
    /// Always present from [`HttpProviderClient`]; a response without usage is
    /// turned into a parse failure by the retry executor.
    pub usage: Option<Usage>,
    /// Model name echoed by the provider.
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl ProviderResponse {
    pub fn new(content: ResponseContent, usage: Usage) -> Self {
        Self {
            content,
            usage: Some(usage),
            model: None,
            finish_reason: None,
        }
    }

    pub fn text(text: impl Into<String>, usage: Usage) -> Self {
        Self::new(ResponseContent::plain(text), usage)
    }
}

/// Build content from a thinking and an answer segment.
pub fn compose_content(thinking: String, answer: String, mode: ThinkingMode) -> ResponseContent {
    if thinking.is_empty() {
        return ResponseContent::Plain { text: answer };
    }
    match mode {
        ThinkingMode::Concatenate => ResponseContent::Plain {
            text: thinking + &answer,
        },
        ThinkingMode::Separate => ResponseContent::Reasoned { thinking, answer },
    }
}

/// One network call to one model.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn send(
        &self,
        prompt: &Prompt,
        target: &ModelTarget,
        options: &SendOptions,
    ) -> Result<ProviderResponse, LlmError>;
}
