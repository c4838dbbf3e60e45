//! OpenAI-compatible `/chat/completions` wire format.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProviderResponse, SendOptions, StreamAccumulator, compose_content};
use crate::error::LlmError;
use crate::types::{ModelTarget, Prompt, Usage};

pub const CHAT_PATH: &str = "/chat/completions";
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<MessagePart>,
    #[serde(default)]
    delta: Option<MessagePart>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePart {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u32>,
    #[serde(default)]
    accepted_prediction_tokens: Option<u32>,
    #[serde(default)]
    rejected_prediction_tokens: Option<u32>,
}

impl OpenAiUsage {
    /// Some compatible providers only report total and completion counts.
    /// `None` when the prompt count can be neither read nor derived.
    fn into_usage(self) -> Option<Usage> {
        let prompt = match (self.prompt_tokens, self.total_tokens) {
            (Some(prompt), _) => prompt,
            (None, Some(total)) => total.saturating_sub(self.completion_tokens),
            (None, None) => return None,
        };
        let total = self
            .total_tokens
            .unwrap_or(prompt.saturating_add(self.completion_tokens));
        let details = self.completion_tokens_details;
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: self.completion_tokens,
            total_tokens: total,
            reasoning_tokens: details.as_ref().and_then(|d| d.reasoning_tokens),
            accepted_prediction_tokens: details.as_ref().and_then(|d| d.accepted_prediction_tokens),
            rejected_prediction_tokens: details.as_ref().and_then(|d| d.rejected_prediction_tokens),
            estimated: false,
        })
    }
}

/// Request body for one user message.
pub fn build_request_body(prompt: &Prompt, target: &ModelTarget, options: &SendOptions) -> Value {
    let mut body = json!({
        "model": target.id(),
        "messages": [{ "role": "user", "content": prompt.text() }],
    });
    if options.stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if target.is_thinking()
        && let Some(effort) = options.reasoning_effort
    {
        body["reasoning_effort"] = json!(effort.as_str());
    }
    body
}

/// Parse a whole-shot response body.
pub fn parse_response(
    body: &str,
    target: &ModelTarget,
    options: &SendOptions,
) -> Result<ProviderResponse, LlmError> {
    let value: Value = serde_json::from_str(body)?;
    let completion: ChatCompletion = serde_json::from_value(value)
        .map_err(|e| LlmError::ParseError(format!("unexpected chat completion shape: {e}")))?;

    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::ParseError("response has no choices".to_string()))?;
    let message = choice
        .message
        .ok_or_else(|| LlmError::ParseError("choice has no message".to_string()))?;
    let usage = completion
        .usage
        .and_then(OpenAiUsage::into_usage)
        .ok_or_else(|| LlmError::ParseError("response has no token usage".to_string()))?;

    let thinking = if target.is_thinking() {
        message.reasoning_content.unwrap_or_default()
    } else {
        String::new()
    };

    Ok(ProviderResponse {
        content: compose_content(
            thinking,
            message.content.unwrap_or_default(),
            options.thinking_mode,
        ),
        usage: Some(usage),
        model: completion.model,
        finish_reason: choice.finish_reason,
    })
}

/// Fold one SSE `data:` payload into the accumulator.
pub fn apply_stream_data(data: &str, acc: &mut StreamAccumulator) -> Result<(), LlmError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(());
    }
    if data == DONE_MARKER {
        acc.finish();
        return Ok(());
    }

    let value: Value = serde_json::from_str(data)?;
    if let Some(error) = value.get("error") {
        return Err(LlmError::StreamError(format!("provider error event: {error}")));
    }
    let chunk: ChatCompletion = serde_json::from_value(value)
        .map_err(|e| LlmError::ParseError(format!("unexpected chunk shape: {e}")))?;

    if let Some(model) = chunk.model {
        acc.set_model(model);
    }
    if let Some(usage) = chunk.usage {
        // Partial counts are left to the accumulator's estimate.
        if let Some(usage) = usage.into_usage() {
            acc.set_usage(usage);
        }
    }
    for choice in chunk.choices {
        let delta = choice.delta.unwrap_or_default();
        if let Some(thinking) = delta.reasoning_content.filter(|t| !t.is_empty()) {
            acc.push_thinking(&thinking);
        }
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            acc.push_answer(&content);
        }
        if let Some(reason) = choice.finish_reason {
            acc.set_finish_reason(reason);
        }
    }
    Ok(())
}
