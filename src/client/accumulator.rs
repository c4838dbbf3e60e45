use super::{ProviderResponse, ThinkingMode, compose_content};
use crate::emulator::Tokenizer;
use crate::types::Usage;

/// Collects streamed deltas until a terminal event or connection close.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    keep_thinking: bool,
    thinking: String,
    answer: String,
    usage: Option<Usage>,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    model: Option<String>,
    finish_reason: Option<String>,
    finished: bool,
    chunks: usize,
}

impl StreamAccumulator {
    /// `keep_thinking` is the target's thinking flag; thinking deltas are
    /// dropped for ordinary models.
    pub fn new(keep_thinking: bool) -> Self {
        Self {
            keep_thinking,
            ..Default::default()
        }
    }

    pub fn push_answer(&mut self, delta: &str) {
        self.chunks += 1;
        self.answer.push_str(delta);
    }

    pub fn push_thinking(&mut self, delta: &str) {
        self.chunks += 1;
        if self.keep_thinking {
            self.thinking.push_str(delta);
        }
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    /// Anthropic reports input and output tokens in different events. The
    /// pair only counts as reported usage once both halves arrived.
    pub fn report_prompt_tokens(&mut self, tokens: u32) {
        self.prompt_tokens = Some(tokens);
    }

    pub fn report_completion_tokens(&mut self, tokens: u32) {
        self.completion_tokens = Some(tokens);
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = Some(model.into());
    }

    pub fn set_finish_reason(&mut self, reason: impl Into<String>) {
        self.finish_reason = Some(reason.into());
    }

    /// Terminal event observed.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    /// Build the response. Missing or partial usage is replaced by an
    /// estimate from the prompt and the accumulated text, so a successful
    /// stream always carries both token counts.
    pub fn into_response(self, prompt_text: &str, mode: ThinkingMode) -> ProviderResponse {
        let reported = self.usage.or(match (self.prompt_tokens, self.completion_tokens) {
            (Some(prompt), Some(completion)) => Some(Usage::new(prompt, completion)),
            _ => None,
        });
        let usage = match reported {
            Some(usage) => usage,
            None => {
                let tokenizer = Tokenizer::new();
                let thinking_tokens = tokenizer.count(&self.thinking);
                let completion = thinking_tokens.saturating_add(tokenizer.count(&self.answer));
                let usage = Usage::new(tokenizer.count(prompt_text), completion).estimated();
                if thinking_tokens > 0 {
                    usage.with_reasoning_tokens(thinking_tokens)
                } else {
                    usage
                }
            }
        };
        ProviderResponse {
            content: compose_content(self.thinking, self.answer, mode),
            usage: Some(usage),
            model: self.model,
            finish_reason: self.finish_reason,
        }
    }
}
