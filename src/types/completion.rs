//! Per-model outcomes.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::Usage;
use crate::error::{ErrorClass, ErrorKind, LlmError};

/// Response text, optionally split into a reasoning segment and the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContent {
    Plain { text: String },
    Reasoned { thinking: String, answer: String },
}

impl ResponseContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn reasoned(thinking: impl Into<String>, answer: impl Into<String>) -> Self {
        Self::Reasoned {
            thinking: thinking.into(),
            answer: answer.into(),
        }
    }

    /// Full text: thinking segment (if any) followed by the answer.
    pub fn text(&self) -> String {
        match self {
            Self::Plain { text } => text.clone(),
            Self::Reasoned { thinking, answer } => format!("{thinking}{answer}"),
        }
    }

    /// Answer segment only.
    pub fn answer(&self) -> &str {
        match self {
            Self::Plain { text } => text,
            Self::Reasoned { answer, .. } => answer,
        }
    }

    pub fn thinking(&self) -> Option<&str> {
        match self {
            Self::Plain { .. } => None,
            Self::Reasoned { thinking, .. } => Some(thinking),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Plain { text } => text.is_empty(),
            Self::Reasoned { thinking, answer } => thinking.is_empty() && answer.is_empty(),
        }
    }
}

impl Default for ResponseContent {
    fn default() -> Self {
        Self::plain("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Success,
    Failed,
}

/// Why a model's request ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: ErrorKind,
    pub class: ErrorClass,
    pub status: Option<u16>,
    pub message: String,
}

impl From<&LlmError> for FailureDetail {
    fn from(err: &LlmError) -> Self {
        Self {
            kind: err.kind(),
            class: err.class(),
            status: err.status_code(),
            message: err.user_message(),
        }
    }
}

/// Final outcome for one (prompt, model) pair within a batch.
///
/// Built once per model regardless of how many attempts it took. A successful
/// result always carries token usage; a failed one never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    model_id: String,
    status: CompletionStatus,
    content: ResponseContent,
    usage: Option<Usage>,
    elapsed: Duration,
    attempts: u32,
    error: Option<FailureDetail>,
}

impl CompletionResult {
    pub fn success(
        model_id: impl Into<String>,
        content: ResponseContent,
        usage: Usage,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            status: CompletionStatus::Success,
            content,
            usage: Some(usage),
            elapsed,
            attempts,
            error: None,
        }
    }

    pub fn failure(
        model_id: impl Into<String>,
        error: &LlmError,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            status: CompletionStatus::Failed,
            content: ResponseContent::default(),
            usage: None,
            elapsed,
            attempts,
            error: Some(FailureDetail::from(error)),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn status(&self) -> CompletionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }

    pub fn content(&self) -> &ResponseContent {
        &self.content
    }

    /// Full response text (empty on failure).
    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Number of network calls made, including the final one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&FailureDetail> {
        self.error.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed { class: ErrorClass, message: String },
}

/// One network call within a retry loop. Logged, never persisted.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub model_id: String,
    pub attempt: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
}

impl RequestAttempt {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
