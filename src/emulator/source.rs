//! Where emulated responses come from.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::store::ConversationStore;

/// Text an emulated model will "generate".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedResponse {
    #[serde(default)]
    pub thinking: Option<String>,
    pub answer: String,
}

impl ScriptedResponse {
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            thinking: None,
            answer: answer.into(),
        }
    }

    pub fn reasoned(thinking: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            thinking: Some(thinking.into()),
            answer: answer.into(),
        }
    }
}

/// Lookup of a scripted response for a (model, prompt) pair.
#[async_trait]
pub trait ResponseSource: Send + Sync {
    /// `Ok(None)` means nothing matches; the server answers 404.
    async fn find(&self, model: &str, prompt: &str) -> Result<Option<ScriptedResponse>, LlmError>;
}

#[derive(Debug, Clone)]
struct Entry {
    model: Option<String>,
    prompt: Option<String>,
    response: ScriptedResponse,
}

/// Fixed table of responses.
///
/// An entry matches when its model id is contained in the requested model
/// name and its prompt equals the request prompt; either side may be left
/// open. Earlier entries win. The fallback answers everything else.
#[derive(Debug, Clone, Default)]
pub struct StaticResponses {
    entries: Vec<Entry>,
    fallback: Option<ScriptedResponse>,
}

impl StaticResponses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with `response`.
    pub fn always(response: ScriptedResponse) -> Self {
        Self::new().with_fallback(response)
    }

    pub fn with_response(
        mut self,
        model: impl Into<String>,
        prompt: impl Into<String>,
        response: ScriptedResponse,
    ) -> Self {
        self.entries.push(Entry {
            model: Some(model.into()),
            prompt: Some(prompt.into()),
            response,
        });
        self
    }

    /// Response for any prompt sent to a matching model.
    pub fn with_model_response(mut self, model: impl Into<String>, response: ScriptedResponse) -> Self {
        self.entries.push(Entry {
            model: Some(model.into()),
            prompt: None,
            response,
        });
        self
    }

    pub fn with_fallback(mut self, response: ScriptedResponse) -> Self {
        self.fallback = Some(response);
        self
    }
}

#[async_trait]
impl ResponseSource for StaticResponses {
    async fn find(&self, model: &str, prompt: &str) -> Result<Option<ScriptedResponse>, LlmError> {
        let hit = self.entries.iter().find(|entry| {
            entry.model.as_deref().is_none_or(|m| model.contains(m))
                && entry.prompt.as_deref().is_none_or(|p| p == prompt)
        });
        Ok(hit
            .map(|entry| entry.response.clone())
            .or_else(|| self.fallback.clone()))
    }
}

/// Replays stored conversations: the newest record with the same prompt
/// whose model id is contained in the requested model name.
#[derive(Clone)]
pub struct StoreReplay {
    store: Arc<dyn ConversationStore>,
    scan_limit: u32,
    fallback: Option<ScriptedResponse>,
}

impl std::fmt::Debug for StoreReplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReplay")
            .field("scan_limit", &self.scan_limit)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl StoreReplay {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            scan_limit: 200,
            fallback: None,
        }
    }

    /// Answer with `response` when no stored conversation matches.
    pub fn with_fallback(mut self, response: ScriptedResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// How many search hits are inspected per request.
    pub fn with_scan_limit(mut self, scan_limit: u32) -> Self {
        self.scan_limit = scan_limit;
        self
    }
}

#[async_trait]
impl ResponseSource for StoreReplay {
    async fn find(&self, model: &str, prompt: &str) -> Result<Option<ScriptedResponse>, LlmError> {
        let hits = self.store.search(prompt, self.scan_limit, 0).await?;
        Ok(hits
            .into_iter()
            .find(|stored| stored.record.prompt == prompt && model.contains(&stored.record.model_id))
            .map(|stored| ScriptedResponse::answer(stored.record.response))
            .or_else(|| self.fallback.clone()))
    }
}
