//! SQLite conversation store.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{ConversationStore, DailyCount, ModelTokenTotals, StoreError, StoreStats};
use crate::types::{ConversationRecord, RecordId, StoredConversation, Usage};

const SELECT_JOINED: &str = r"
    SELECT c.id, c.conversation_id, c.model_name, c.timestamp, c.prompt, c.response,
           c.metadata, c.execution_time,
           t.input_tokens, t.output_tokens, t.total_tokens, t.reasoning_tokens,
           t.accepted_prediction_tokens, t.rejected_prediction_tokens, t.estimated
    FROM conversations c
    LEFT JOIN token_usage t ON t.record_id = c.id
";

/// Conversation store persisted in a SQLite database.
#[derive(Clone, Debug)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    /// Open (creating if needed) a database file.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Connect using a `sqlite:` URL.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. A single connection keeps every query on the same database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT,
                model_name TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT,
                metadata TEXT,
                execution_time REAL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS token_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                reasoning_tokens INTEGER,
                accepted_prediction_tokens INTEGER,
                rejected_prediction_tokens INTEGER,
                estimated INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_timestamp ON conversations(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_conversation_id ON conversations(conversation_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_token_usage_record ON token_usage(record_id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_stored(row: &SqliteRow) -> Result<StoredConversation, StoreError> {
        let timestamp: String = row.try_get("timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Serialization(format!("bad timestamp '{timestamp}': {e}")))?;

        let metadata = match row.try_get::<Option<String>, _>("metadata")? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };

        let usage = match row.try_get::<Option<i64>, _>("input_tokens")? {
            Some(input) => {
                let output: i64 = row.try_get("output_tokens")?;
                let total: i64 = row.try_get("total_tokens")?;
                let optional = |column: &str| -> Result<Option<u32>, StoreError> {
                    Ok(row.try_get::<Option<i64>, _>(column)?.map(|v| v as u32))
                };
                Some(Usage {
                    prompt_tokens: input as u32,
                    completion_tokens: output as u32,
                    total_tokens: total as u32,
                    reasoning_tokens: optional("reasoning_tokens")?,
                    accepted_prediction_tokens: optional("accepted_prediction_tokens")?,
                    rejected_prediction_tokens: optional("rejected_prediction_tokens")?,
                    estimated: row.try_get::<Option<i64>, _>("estimated")?.unwrap_or(0) != 0,
                })
            }
            None => None,
        };

        Ok(StoredConversation {
            id: RecordId(row.try_get("id")?),
            record: ConversationRecord {
                conversation_id: row.try_get("conversation_id")?,
                model_id: row.try_get("model_name")?,
                prompt: row.try_get("prompt")?,
                response: row
                    .try_get::<Option<String>, _>("response")?
                    .unwrap_or_default(),
                usage,
                execution_time_secs: row.try_get("execution_time")?,
                metadata,
                timestamp,
            },
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn append(&self, record: ConversationRecord) -> Result<RecordId, StoreError> {
        let metadata = if record.metadata.is_null() {
            None
        } else {
            Some(serde_json::to_string(&record.metadata)?)
        };
        let timestamp = record
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r"
            INSERT INTO conversations (conversation_id, model_name, timestamp, prompt, response, metadata, execution_time)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.conversation_id)
        .bind(&record.model_id)
        .bind(&timestamp)
        .bind(&record.prompt)
        .bind(&record.response)
        .bind(&metadata)
        .bind(record.execution_time_secs)
        .execute(&mut *tx)
        .await?;
        let id = inserted.last_insert_rowid();

        if let Some(usage) = record.usage {
            sqlx::query(
                r"
                INSERT INTO token_usage (
                    record_id, input_tokens, output_tokens, total_tokens,
                    reasoning_tokens, accepted_prediction_tokens, rejected_prediction_tokens,
                    estimated
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(id)
            .bind(i64::from(usage.prompt_tokens))
            .bind(i64::from(usage.completion_tokens))
            .bind(i64::from(usage.total_tokens))
            .bind(usage.reasoning_tokens.map(i64::from))
            .bind(usage.accepted_prediction_tokens.map(i64::from))
            .bind(usage.rejected_prediction_tokens.map(i64::from))
            .bind(i64::from(usage.estimated))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(RecordId(id))
    }

    async fn get(&self, id: RecordId) -> Result<Option<StoredConversation>, StoreError> {
        let sql = format!("{SELECT_JOINED} WHERE c.id = ?");
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_stored).transpose()
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<StoredConversation>, StoreError> {
        let sql = format!("{SELECT_JOINED} ORDER BY c.timestamp DESC, c.id DESC LIMIT ? OFFSET ?");
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_stored).collect()
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredConversation>, StoreError> {
        let pattern = format!("%{query}%");
        let sql = format!(
            "{SELECT_JOINED} WHERE c.prompt LIKE ? OR c.response LIKE ? \
             ORDER BY c.timestamp DESC, c.id DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_stored).collect()
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let total_conversations: i64 = sqlx::query("SELECT COUNT(*) AS count FROM conversations")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;

        let tokens_by_model = sqlx::query(
            r"
            SELECT c.model_name,
                   SUM(t.input_tokens) AS total_input,
                   SUM(t.output_tokens) AS total_output,
                   SUM(t.total_tokens) AS total
            FROM conversations c
            JOIN token_usage t ON t.record_id = c.id
            GROUP BY c.model_name
            ORDER BY c.model_name
            ",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(ModelTokenTotals {
                model_id: row.try_get("model_name")?,
                input_tokens: row.try_get("total_input")?,
                output_tokens: row.try_get("total_output")?,
                total_tokens: row.try_get("total")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        let conversations_by_date = sqlx::query(
            r"
            SELECT DATE(timestamp) AS date, COUNT(*) AS count
            FROM conversations
            GROUP BY DATE(timestamp)
            ORDER BY date DESC
            LIMIT 30
            ",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| {
            Ok(DailyCount {
                date: row.try_get("date")?,
                count: row.try_get("count")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(StoreStats {
            total_conversations,
            tokens_by_model,
            conversations_by_date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(model: &str, prompt: &str) -> ConversationRecord {
        ConversationRecord::new(model, prompt, format!("answer from {model}"))
            .with_conversation_id("conv-1")
            .with_usage(Usage::new(5, 7).with_reasoning_tokens(3))
            .with_execution_time(1.25)
            .with_metadata(serde_json::json!({"stream": true}))
    }

    #[tokio::test]
    async fn append_and_get_round_trip_usage_and_metadata() {
        let store = SqliteConversationStore::in_memory().await.unwrap();
        let id = store.append(sample("gpt-4o", "hi")).await.unwrap();

        let stored = store.get(id).await.unwrap().expect("record");
        assert_eq!(stored.record.model_id, "gpt-4o");
        assert_eq!(stored.record.conversation_id.as_deref(), Some("conv-1"));
        let usage = stored.record.usage.expect("usage");
        assert_eq!(usage.total_tokens, 12);
        assert_eq!(usage.reasoning_tokens, Some(3));
        assert_eq!(stored.record.metadata["stream"], true);
        assert_eq!(stored.record.execution_time_secs, Some(1.25));

        assert!(store.get(RecordId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_without_usage_have_no_token_row() {
        let store = SqliteConversationStore::in_memory().await.unwrap();
        let id = store
            .append(ConversationRecord::new("m", "p", "r"))
            .await
            .unwrap();
        let stored = store.get(id).await.unwrap().unwrap();
        assert!(stored.record.usage.is_none());
        assert!(store.stats().await.unwrap().tokens_by_model.is_empty());
    }

    #[tokio::test]
    async fn search_and_stats() {
        let store = SqliteConversationStore::in_memory().await.unwrap();
        store.append(sample("o1", "prime numbers")).await.unwrap();
        store.append(sample("o1", "fibonacci")).await.unwrap();
        store.append(sample("gpt-4o", "prime gaps")).await.unwrap();

        let hits = store.search("prime", 10, 0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.prompt, "prime gaps");

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_conversations, 3);
        let o1 = stats
            .tokens_by_model
            .iter()
            .find(|t| t.model_id == "o1")
            .unwrap();
        assert_eq!(o1.total_tokens, 24);
        assert_eq!(stats.conversations_by_date.len(), 1);
        assert_eq!(stats.conversations_by_date[0].count, 3);
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversations.db");

        let id = {
            let store = SqliteConversationStore::open(&path).await.unwrap();
            store.append(sample("o1", "persist me")).await.unwrap()
        };

        let store = SqliteConversationStore::open(&path).await.unwrap();
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.record.prompt, "persist me");
        assert_eq!(store.list(10, 0).await.unwrap().len(), 1);
    }
}
