//! Provider-shaped framing of emulated responses.
//!
//! Two dialects are spoken: OpenAI-compatible `chat.completion.chunk` events
//! closed by a `[DONE]` sentinel, and Anthropic `/messages` events closed by
//! `message_stop`.

use serde_json::{Value, json};

use super::{Generated, Segment, StreamChunk};
use crate::client::openai::DONE_MARKER;

/// Which provider dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    OpenAi,
    Anthropic,
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: Option<&'static str>,
    pub data: String,
}

impl Frame {
    fn data(value: &Value) -> Self {
        Self {
            event: None,
            data: value.to_string(),
        }
    }

    fn named(event: &'static str, value: &Value) -> Self {
        Self {
            event: Some(event),
            data: value.to_string(),
        }
    }
}

/// Turns emulator chunks into wire frames for one response.
#[derive(Debug)]
pub struct WireEncoder {
    format: WireFormat,
    id: String,
    model: String,
    created: i64,
    prompt_tokens: u32,
    thinking_tokens: u32,
    answer_tokens: u32,
    role_sent: bool,
    open_block: Option<(usize, Segment)>,
    next_block: usize,
}

impl WireEncoder {
    pub fn new(format: WireFormat, model: impl Into<String>, prompt_tokens: u32) -> Self {
        Self {
            format,
            id: response_id(format),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            prompt_tokens,
            thinking_tokens: 0,
            answer_tokens: 0,
            role_sent: false,
            open_block: None,
            next_block: 0,
        }
    }

    /// Frames sent before the first token.
    pub fn preamble(&mut self) -> Vec<Frame> {
        match self.format {
            WireFormat::OpenAi => Vec::new(),
            WireFormat::Anthropic => vec![Frame::named(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": self.id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": null,
                        "usage": { "input_tokens": self.prompt_tokens, "output_tokens": 1 },
                    },
                }),
            )],
        }
    }

    pub fn encode(&mut self, chunk: &StreamChunk) -> Vec<Frame> {
        if chunk.is_final {
            return self.terminal();
        }
        match chunk.segment {
            Segment::Thinking => self.thinking_tokens += 1,
            Segment::Answer => self.answer_tokens += 1,
        }
        match self.format {
            WireFormat::OpenAi => vec![self.openai_delta(chunk)],
            WireFormat::Anthropic => self.anthropic_delta(chunk),
        }
    }

    fn openai_delta(&mut self, chunk: &StreamChunk) -> Frame {
        let mut delta = match chunk.segment {
            Segment::Thinking => json!({ "reasoning_content": chunk.delta }),
            Segment::Answer => json!({ "content": chunk.delta }),
        };
        if !self.role_sent {
            delta["role"] = json!("assistant");
            self.role_sent = true;
        }
        Frame::data(&json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": null }],
        }))
    }

    fn anthropic_delta(&mut self, chunk: &StreamChunk) -> Vec<Frame> {
        let mut frames = Vec::new();
        let index = match self.open_block {
            Some((index, segment)) if segment == chunk.segment => index,
            open => {
                if let Some((index, _)) = open {
                    frames.push(block_stop(index));
                }
                let index = self.next_block;
                self.next_block += 1;
                self.open_block = Some((index, chunk.segment));
                let block = match chunk.segment {
                    Segment::Thinking => json!({ "type": "thinking", "thinking": "" }),
                    Segment::Answer => json!({ "type": "text", "text": "" }),
                };
                frames.push(Frame::named(
                    "content_block_start",
                    &json!({ "type": "content_block_start", "index": index, "content_block": block }),
                ));
                index
            }
        };
        let delta = match chunk.segment {
            Segment::Thinking => json!({ "type": "thinking_delta", "thinking": chunk.delta }),
            Segment::Answer => json!({ "type": "text_delta", "text": chunk.delta }),
        };
        frames.push(Frame::named(
            "content_block_delta",
            &json!({ "type": "content_block_delta", "index": index, "delta": delta }),
        ));
        frames
    }

    fn terminal(&mut self) -> Vec<Frame> {
        let completion = self.thinking_tokens + self.answer_tokens;
        match self.format {
            WireFormat::OpenAi => vec![
                Frame::data(&json!({
                    "id": self.id,
                    "object": "chat.completion.chunk",
                    "created": self.created,
                    "model": self.model,
                    "choices": [{ "index": 0, "delta": {}, "finish_reason": "stop" }],
                    "usage": openai_usage(self.prompt_tokens, completion, self.thinking_tokens),
                })),
                Frame {
                    event: None,
                    data: DONE_MARKER.to_string(),
                },
            ],
            WireFormat::Anthropic => {
                let mut frames = Vec::new();
                if let Some((index, _)) = self.open_block.take() {
                    frames.push(block_stop(index));
                }
                frames.push(Frame::named(
                    "message_delta",
                    &json!({
                        "type": "message_delta",
                        "delta": { "stop_reason": "end_turn", "stop_sequence": null },
                        "usage": { "output_tokens": completion },
                    }),
                ));
                frames.push(Frame::named("message_stop", &json!({ "type": "message_stop" })));
                frames
            }
        }
    }
}

fn block_stop(index: usize) -> Frame {
    Frame::named(
        "content_block_stop",
        &json!({ "type": "content_block_stop", "index": index }),
    )
}

fn response_id(format: WireFormat) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    match format {
        WireFormat::OpenAi => format!("chatcmpl-{id}"),
        WireFormat::Anthropic => format!("msg_{id}"),
    }
}

fn openai_usage(prompt: u32, completion: u32, reasoning: u32) -> Value {
    json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": prompt.saturating_add(completion),
        "completion_tokens_details": {
            "reasoning_tokens": reasoning,
            "accepted_prediction_tokens": 0,
            "rejected_prediction_tokens": 0,
        },
    })
}

/// Complete body of a whole-shot response.
pub fn whole_shot_body(
    format: WireFormat,
    model: &str,
    prompt_tokens: u32,
    generated: &Generated,
) -> Value {
    let completion = generated.token_count() as u32;
    match format {
        WireFormat::OpenAi => {
            let mut message = json!({ "role": "assistant", "content": generated.answer });
            if !generated.thinking.is_empty() {
                message["reasoning_content"] = json!(generated.thinking);
            }
            json!({
                "id": response_id(format),
                "object": "chat.completion",
                "created": chrono::Utc::now().timestamp(),
                "model": model,
                "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }],
                "usage": openai_usage(prompt_tokens, completion, generated.thinking_tokens as u32),
            })
        }
        WireFormat::Anthropic => {
            let mut content = Vec::new();
            if !generated.thinking.is_empty() {
                content.push(json!({ "type": "thinking", "thinking": generated.thinking, "signature": "" }));
            }
            content.push(json!({ "type": "text", "text": generated.answer }));
            json!({
                "id": response_id(format),
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": content,
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": { "input_tokens": prompt_tokens, "output_tokens": completion },
            })
        }
    }
}

/// Provider-style error type name for a status code.
pub fn error_type(status: u16) -> &'static str {
    match status {
        400 | 422 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        503 | 529 => "overloaded_error",
        _ => "api_error",
    }
}

/// Error body in the provider's own shape.
pub fn error_body(format: WireFormat, status: u16, message: &str) -> Value {
    match format {
        WireFormat::OpenAi => json!({
            "error": { "message": message, "type": error_type(status), "code": status },
        }),
        WireFormat::Anthropic => json!({
            "type": "error",
            "error": { "type": error_type(status), "message": message },
        }),
    }
}
