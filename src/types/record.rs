use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Usage;

/// Identity assigned by a conversation store on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One request/response pair as it is written to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: Option<String>,
    pub model_id: String,
    pub prompt: String,
    pub response: String,
    pub usage: Option<Usage>,
    pub execution_time_secs: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(
        model_id: impl Into<String>,
        prompt: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: None,
            model_id: model_id.into(),
            prompt: prompt.into(),
            response: response.into(),
            usage: None,
            execution_time_secs: None,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_execution_time(mut self, secs: f64) -> Self {
        self.execution_time_secs = Some(secs);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A record read back from a store together with its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredConversation {
    pub id: RecordId,
    #[serde(flatten)]
    pub record: ConversationRecord,
}
