use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{CompletionResult, RecordId};

/// Outcome of one batch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Conversation id shared by every record this batch wrote.
    pub conversation_id: String,
    /// One result per input target, in input order.
    pub results: Vec<CompletionResult>,
    /// Store identity of each persisted result, aligned with `results`.
    pub record_ids: Vec<Option<RecordId>>,
    pub elapsed: Duration,
    /// The batch was cancelled before every target finished.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn get(&self, model_id: &str) -> Option<&CompletionResult> {
        self.results.iter().find(|r| r.model_id() == model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompletionResult> {
        self.results.iter()
    }

    pub fn into_results(self) -> Vec<CompletionResult> {
        self.results
    }
}
