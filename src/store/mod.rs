//! Conversation persistence.
//!
//! A store is an append-only log of request/response pairs. Appends from
//! different models may interleave freely: each record is an independent
//! insert and no operation spans more than one record.
//!
//! Two backends are provided:
//! - [`InMemoryConversationStore`] for tests and throwaway runs
//! - [`SqliteConversationStore`] backed by `sqlx` with a `conversations` table
//!   and a `token_usage` side table

mod memory;
mod sqlite;

pub use memory::InMemoryConversationStore;
pub use sqlite::SqliteConversationStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConversationRecord, RecordId, StoredConversation};

/// Persistence failures. Logged by the dispatcher, never surfaced to batch callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Token totals for one model across all stored conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTokenTotals {
    pub model_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Number of conversations stored on one calendar day (`YYYY-MM-DD`, UTC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_conversations: i64,
    pub tokens_by_model: Vec<ModelTokenTotals>,
    /// Most recent 30 days that have at least one conversation, newest first.
    pub conversations_by_date: Vec<DailyCount>,
}

/// Append-only conversation log with simple read-side queries.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Persist one record and return the identity the store assigned to it.
    async fn append(&self, record: ConversationRecord) -> Result<RecordId, StoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<StoredConversation>, StoreError>;

    /// Newest first.
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<StoredConversation>, StoreError>;

    /// Records whose prompt or response contains `query`, newest first.
    async fn search(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredConversation>, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
