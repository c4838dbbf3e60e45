//! Anthropic-style `/messages` wire format.

use serde::Deserialize;
use serde_json::{Value, json};

use super::{ProviderResponse, SendOptions, StreamAccumulator, compose_content};
use crate::error::LlmError;
use crate::types::{ModelTarget, Prompt, Usage};

pub const MESSAGES_PATH: &str = "/messages";
pub const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_TOKENS: u32 = 20_000;
pub const DEFAULT_THINKING_BUDGET: u32 = 10_000;

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(rename = "type", default)]
    delta_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

pub fn build_request_body(prompt: &Prompt, target: &ModelTarget, options: &SendOptions) -> Value {
    let mut max_tokens = options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    let mut body = json!({
        "model": target.id(),
        "messages": [{ "role": "user", "content": prompt.text() }],
        "stream": options.stream,
    });
    if target.is_thinking() {
        let budget = options.thinking_budget.unwrap_or(DEFAULT_THINKING_BUDGET);
        // The budget must leave room for the answer.
        if max_tokens <= budget {
            max_tokens = budget.saturating_add(1024);
        }
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    body["max_tokens"] = json!(max_tokens);
    body
}

pub fn parse_response(
    body: &str,
    target: &ModelTarget,
    options: &SendOptions,
) -> Result<ProviderResponse, LlmError> {
    let value: Value = serde_json::from_str(body)?;
    let response: MessagesResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::ParseError(format!("unexpected messages shape: {e}")))?;

    let usage = match response.usage {
        Some(AnthropicUsage {
            input_tokens: Some(input),
            output_tokens: Some(output),
        }) => Usage::new(input, output),
        _ => {
            return Err(LlmError::ParseError(
                "response has no token usage".to_string(),
            ));
        }
    };

    let mut thinking = String::new();
    let mut answer = String::new();
    for block in response.content {
        match block {
            ContentBlock::Text { text } => answer.push_str(&text),
            ContentBlock::Thinking { thinking: t } if target.is_thinking() => {
                thinking.push_str(&t)
            }
            _ => {}
        }
    }

    Ok(ProviderResponse {
        content: compose_content(thinking, answer, options.thinking_mode),
        usage: Some(usage),
        model: response.model,
        finish_reason: response.stop_reason,
    })
}

/// Fold one SSE event into the accumulator.
pub fn apply_stream_event(
    event: &str,
    data: &str,
    acc: &mut StreamAccumulator,
) -> Result<(), LlmError> {
    if event == "ping" || data.trim().is_empty() {
        return Ok(());
    }

    let value: Value = serde_json::from_str(data)?;
    let parsed: StreamEvent = serde_json::from_value(value)
        .map_err(|e| LlmError::ParseError(format!("unexpected stream event shape: {e}")))?;

    match parsed.event_type.as_str() {
        "message_start" => {
            if let Some(message) = parsed.message {
                if let Some(model) = message.model {
                    acc.set_model(model);
                }
                if let Some(usage) = message.usage {
                    merge_usage(acc, usage);
                }
            }
        }
        "content_block_delta" => {
            if let Some(delta) = parsed.delta {
                match delta.delta_type.as_deref() {
                    Some("thinking_delta") => {
                        if let Some(t) = delta.thinking {
                            acc.push_thinking(&t);
                        }
                    }
                    Some("text_delta") | None => {
                        if let Some(text) = delta.text {
                            acc.push_answer(&text);
                        }
                    }
                    _ => {}
                }
            }
        }
        "message_delta" => {
            if let Some(reason) = parsed.delta.and_then(|d| d.stop_reason) {
                acc.set_finish_reason(reason);
            }
            if let Some(usage) = parsed.usage {
                merge_usage(acc, usage);
            }
        }
        "message_stop" => acc.finish(),
        "error" => {
            let detail = parsed.error.unwrap_or(Value::Null);
            return Err(LlmError::StreamError(format!(
                "provider error event: {detail}"
            )));
        }
        _ => {}
    }
    Ok(())
}

fn merge_usage(acc: &mut StreamAccumulator, usage: AnthropicUsage) {
    if let Some(input) = usage.input_tokens {
        acc.report_prompt_tokens(input);
    }
    if let Some(output) = usage.output_tokens {
        acc.report_completion_tokens(output);
    }
}
