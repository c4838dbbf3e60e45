//! # polyprompt
//!
//! Sends one prompt to many LLM providers at once, retries what can be
//! retried, persists what succeeded, and hands back one result per model in
//! the order the models were given.
#![deny(unsafe_code)]

//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use polyprompt::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::from_env()?;
//!     let store = Arc::new(SqliteConversationStore::open("conversations.db").await?);
//!     let dispatcher = Dispatcher::from_config(&config, Arc::new(HttpProviderClient::new()?), store)?;
//!
//!     let results = dispatcher
//!         .batch_process(["gpt-4o", "claude-3-opus"], "What is 2+2?", 4, true)
//!         .await?;
//!     for result in &results {
//!         println!("{}: {}", result.model_id(), result.text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`dispatch`]: bounded concurrent fan-out of a prompt over many models
//! - [`retry`]: per-model retry with exponential backoff
//! - [`client`]: provider clients speaking OpenAI-compatible and Anthropic wire formats
//! - [`store`]: conversation persistence (in-memory, SQLite)
//! - [`emulator`]: a provider stand-in with realistic streaming pacing

pub mod cancel;
pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod emulator;
pub mod error;
pub mod retry;
pub mod store;
pub mod telemetry;
pub mod types;

pub use error::LlmError;

/// Commonly used items.
pub mod prelude {
    pub use crate::cancel::CancelHandle;
    pub use crate::catalog::ModelCatalog;
    pub use crate::client::{
        HttpProviderClient, ProviderClient, ProviderResponse, ReasoningEffort, SendOptions,
        ThinkingMode,
    };
    pub use crate::config::AppConfig;
    pub use crate::dispatch::{BatchDispatcher, BatchOptions, BatchReport, Dispatcher};
    pub use crate::error::{ErrorClass, ErrorKind, LlmError};
    pub use crate::retry::{RetryExecutor, RetryPolicy};
    pub use crate::store::{
        ConversationStore, InMemoryConversationStore, SqliteConversationStore, StoreError,
    };
    pub use crate::types::{
        CompletionResult, CompletionStatus, ConversationRecord, ModelTarget, Prompt,
        ProviderProfile, ResponseContent, Usage, WireStyle,
    };
}
