use serde::{Deserialize, Serialize};

/// Token usage for one completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_prediction_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_prediction_tokens: Option<u32>,
    /// Counts were computed locally because the provider never reported them.
    #[serde(default)]
    pub estimated: bool,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total_tokens: u32) -> Self {
        self.total_tokens = total_tokens;
        self
    }

    pub fn with_reasoning_tokens(mut self, tokens: u32) -> Self {
        self.reasoning_tokens = Some(tokens);
        self
    }

    pub fn estimated(mut self) -> Self {
        self.estimated = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_saturates_instead_of_overflowing() {
        assert_eq!(Usage::new(u32::MAX, 5).total_tokens, u32::MAX);
        assert_eq!(Usage::new(2, 3).total_tokens, 5);
    }
}
