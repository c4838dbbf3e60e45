use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ConversationStore, DailyCount, ModelTokenTotals, StoreError, StoreStats};
use crate::types::{ConversationRecord, RecordId, StoredConversation};

/// Store that keeps every record in process memory.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    records: RwLock<Vec<StoredConversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Snapshot of all records in insertion order.
    pub async fn records(&self) -> Vec<StoredConversation> {
        self.records.read().await.clone()
    }

    fn newest_first<'a>(
        records: impl DoubleEndedIterator<Item = &'a StoredConversation>,
        limit: u32,
        offset: u32,
    ) -> Vec<StoredConversation> {
        records
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, record: ConversationRecord) -> Result<RecordId, StoreError> {
        let mut records = self.records.write().await;
        let id = RecordId(records.len() as i64 + 1);
        records.push(StoredConversation { id, record });
        Ok(id)
    }

    async fn get(&self, id: RecordId) -> Result<Option<StoredConversation>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<StoredConversation>, StoreError> {
        let records = self.records.read().await;
        Ok(Self::newest_first(records.iter(), limit, offset))
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredConversation>, StoreError> {
        let records = self.records.read().await;
        let matching = records
            .iter()
            .filter(|r| r.record.prompt.contains(query) || r.record.response.contains(query));
        Ok(Self::newest_first(matching, limit, offset))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let records = self.records.read().await;

        let mut by_model: BTreeMap<&str, ModelTokenTotals> = BTreeMap::new();
        let mut by_date: BTreeMap<String, i64> = BTreeMap::new();
        for stored in records.iter() {
            let record = &stored.record;
            *by_date
                .entry(record.timestamp.format("%Y-%m-%d").to_string())
                .or_default() += 1;
            if let Some(usage) = record.usage {
                let totals = by_model
                    .entry(record.model_id.as_str())
                    .or_insert_with(|| ModelTokenTotals {
                        model_id: record.model_id.clone(),
                        input_tokens: 0,
                        output_tokens: 0,
                        total_tokens: 0,
                    });
                totals.input_tokens += i64::from(usage.prompt_tokens);
                totals.output_tokens += i64::from(usage.completion_tokens);
                totals.total_tokens += i64::from(usage.total_tokens);
            }
        }

        Ok(StoreStats {
            total_conversations: records.len() as i64,
            tokens_by_model: by_model.into_values().collect(),
            conversations_by_date: by_date
                .into_iter()
                .rev()
                .take(30)
                .map(|(date, count)| DailyCount { date, count })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;

    #[tokio::test]
    async fn assigns_increasing_ids_and_lists_newest_first() {
        let store = InMemoryConversationStore::new();
        let a = store
            .append(ConversationRecord::new("m1", "p1", "r1"))
            .await
            .unwrap();
        let b = store
            .append(ConversationRecord::new("m2", "p2", "r2"))
            .await
            .unwrap();
        assert!(b > a);

        let listed = store.list(10, 0).await.unwrap();
        assert_eq!(listed[0].id, b);
        assert_eq!(listed[1].id, a);
        assert_eq!(store.list(10, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_matches_prompt_or_response() {
        let store = InMemoryConversationStore::new();
        store
            .append(ConversationRecord::new("m1", "what is rust", "a language"))
            .await
            .unwrap();
        store
            .append(ConversationRecord::new("m1", "hello", "rust again"))
            .await
            .unwrap();
        store
            .append(ConversationRecord::new("m1", "unrelated", "nothing"))
            .await
            .unwrap();

        assert_eq!(store.search("rust", 10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stats_sum_tokens_per_model() {
        let store = InMemoryConversationStore::new();
        store
            .append(ConversationRecord::new("m1", "a", "b").with_usage(Usage::new(2, 3)))
            .await
            .unwrap();
        store
            .append(ConversationRecord::new("m1", "c", "d").with_usage(Usage::new(1, 1)))
            .await
            .unwrap();
        store
            .append(ConversationRecord::new("m2", "e", "f"))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_conversations, 3);
        assert_eq!(stats.tokens_by_model.len(), 1);
        assert_eq!(stats.tokens_by_model[0].total_tokens, 7);
        assert_eq!(stats.conversations_by_date[0].count, 3);
    }
}
