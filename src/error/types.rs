//! Core error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for dispatch, transport, persistence and emulation.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// Connection-level failure (refused, reset, DNS, proxy).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The call did not finish within its timeout.
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Non-2xx response from the provider.
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Credentials were rejected (401/403).
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The stream broke off or the provider reported an error event mid-stream.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Response body does not have the expected shape.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Response body is not valid JSON.
    #[error("JSON error: {0}")]
    JsonError(String),

    /// Requested model identifier has no catalog entry.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Caller violated an API contract (empty model list, zero workers, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Work was abandoned because the caller cancelled it.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Whether retrying can change the outcome of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Coarse origin of a failure, suitable for rendering a per-model failure row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Server,
    Client,
    Auth,
    Parse,
    UnknownModel,
    Store,
    Validation,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Client => "client",
            Self::Auth => "auth",
            Self::Parse => "parse",
            Self::UnknownModel => "unknown_model",
            Self::Store => "store",
            Self::Validation => "validation",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LlmError {
    /// Create an API error from a status code and message.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an API error that keeps the provider's error body.
    pub fn api_error_with_details(
        code: u16,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// HTTP status associated with this error, if any.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Retry classification.
    ///
    /// Timeouts, connection failures, broken streams, 429 and 5xx are
    /// retryable. Every other 4xx, parse failures and caller mistakes are
    /// terminal.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::HttpError(_) | Self::TimeoutError(_) | Self::StreamError(_) => {
                ErrorClass::Retryable
            }
            Self::ApiError { code, .. } => {
                if *code == 429 || *code >= 500 {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Terminal
                }
            }
            _ => ErrorClass::Terminal,
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Retryable)
    }

    /// Presentation kind.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::HttpError(_) | Self::StreamError(_) => ErrorKind::Network,
            Self::TimeoutError(_) => ErrorKind::Timeout,
            Self::ApiError { code, .. } => match *code {
                429 => ErrorKind::RateLimit,
                401 | 403 => ErrorKind::Auth,
                c if c >= 500 => ErrorKind::Server,
                _ => ErrorKind::Client,
            },
            Self::AuthenticationError(_) => ErrorKind::Auth,
            Self::ParseError(_) | Self::JsonError(_) => ErrorKind::Parse,
            Self::UnknownModel(_) => ErrorKind::UnknownModel,
            Self::Store(_) => ErrorKind::Store,
            Self::InvalidInput(_) | Self::ConfigurationError(_) => ErrorKind::Validation,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Short human-readable message without the variant prefix.
    pub fn user_message(&self) -> String {
        match self {
            Self::HttpError(m)
            | Self::TimeoutError(m)
            | Self::AuthenticationError(m)
            | Self::StreamError(m)
            | Self::ParseError(m)
            | Self::JsonError(m)
            | Self::InvalidInput(m)
            | Self::Cancelled(m)
            | Self::ConfigurationError(m)
            | Self::InternalError(m) => m.clone(),
            Self::ApiError { code, message, .. } => format!("{code}: {message}"),
            Self::UnknownModel(model) => format!("model '{model}' is not in the catalog"),
            Self::Store(e) => e.to_string(),
        }
    }
}
