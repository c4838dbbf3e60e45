//! Speed profiles: how fast an emulated model "generates" tokens.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub const DEFAULT_TOKENS_PER_SECOND: f64 = 40.0;
pub const SLOW_TOKENS_PER_SECOND: f64 = 15.0;
pub const DEFAULT_TIME_TO_FIRST_TOKEN: Duration = Duration::from_millis(300);

/// Measured output speeds of real models, in tokens per second.
const MODEL_SPEEDS: &[(&str, f64)] = &[
    ("o1", 40.0),
    ("deepseek-chat", 38.0),
    ("gpt-4o", 86.0),
    ("o3-mini", 105.0),
    ("deepseek-ai/DeepSeek-R1", 38.0),
    ("TA/deepseek-ai/DeepSeek-R1", 76.0),
    ("claude-3-5-sonnet", 55.0),
    ("claude-3-7-sonnet-20250219", 55.0),
    ("gemini-2.0-flash-thinking-exp-01-21", 200.0),
    ("gemini-2.0-flash-001", 170.0),
    ("gpt-4.5-preview", 14.0),
    ("claude-3-opus", 30.0),
    ("ark-deepseek-r1-250120", 28.5),
];

/// Pacing of one emulated response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedProfile {
    pub time_to_first_token: Duration,
    pub tokens_per_second: f64,
    /// Emit exactly this many tokens, truncating or cycling the content.
    pub total_tokens: Option<u32>,
}

impl Default for SpeedProfile {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_TO_FIRST_TOKEN, DEFAULT_TOKENS_PER_SECOND)
    }
}

impl SpeedProfile {
    pub const fn new(time_to_first_token: Duration, tokens_per_second: f64) -> Self {
        Self {
            time_to_first_token,
            tokens_per_second,
            total_tokens: None,
        }
    }

    pub const fn with_total_tokens(mut self, total_tokens: u32) -> Self {
        self.total_tokens = Some(total_tokens);
        self
    }

    pub const fn with_time_to_first_token(mut self, ttft: Duration) -> Self {
        self.time_to_first_token = ttft;
        self
    }

    pub fn validate(&self) -> Result<(), LlmError> {
        if !self.tokens_per_second.is_finite() || self.tokens_per_second <= 0.0 {
            return Err(LlmError::InvalidInput(format!(
                "tokens_per_second must be positive, got {}",
                self.tokens_per_second
            )));
        }
        Ok(())
    }

    /// Offset from the start of the response at which token `index` is emitted.
    pub fn emission_offset(&self, index: usize) -> Duration {
        self.time_to_first_token + Duration::from_secs_f64(index as f64 / self.tokens_per_second)
    }

    /// Time to produce `tokens` tokens: the whole-shot latency.
    pub fn generation_time(&self, tokens: usize) -> Duration {
        self.emission_offset(tokens)
    }
}

/// Speed profile as it appears in a request body. Times are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfileSpec {
    #[serde(default)]
    pub time_to_first_token: Option<f64>,
    #[serde(default)]
    pub tokens_per_second: Option<f64>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl SpeedProfileSpec {
    /// Overlay the fields that are set onto `base`.
    pub fn apply(&self, base: SpeedProfile) -> Result<SpeedProfile, LlmError> {
        let mut profile = base;
        if let Some(ttft) = self.time_to_first_token {
            if !ttft.is_finite() || ttft < 0.0 {
                return Err(LlmError::InvalidInput(format!(
                    "time_to_first_token must be non-negative, got {ttft}"
                )));
            }
            profile.time_to_first_token = Duration::from_secs_f64(ttft);
        }
        if let Some(tps) = self.tokens_per_second {
            profile.tokens_per_second = tps;
        }
        if let Some(total) = self.total_tokens {
            profile.total_tokens = Some(total);
        }
        profile.validate()?;
        Ok(profile)
    }
}

/// Per-model speeds plus named profiles.
#[derive(Debug, Clone)]
pub struct SpeedTable {
    models: HashMap<String, f64>,
    named: HashMap<String, SpeedProfile>,
    default: SpeedProfile,
}

impl Default for SpeedTable {
    fn default() -> Self {
        let models = MODEL_SPEEDS
            .iter()
            .map(|(name, tps)| (name.to_string(), *tps))
            .collect();
        let mut named = HashMap::new();
        named.insert(
            "slow".to_string(),
            SpeedProfile::new(DEFAULT_TIME_TO_FIRST_TOKEN, SLOW_TOKENS_PER_SECOND),
        );
        named.insert(
            "fast".to_string(),
            SpeedProfile::new(Duration::from_millis(50), 200.0),
        );
        Self {
            models,
            named,
            default: SpeedProfile::default(),
        }
    }
}

impl SpeedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>, tokens_per_second: f64) -> Self {
        self.models.insert(model.into(), tokens_per_second);
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, profile: SpeedProfile) -> Self {
        self.named.insert(name.into(), profile);
        self
    }

    pub fn with_default(mut self, profile: SpeedProfile) -> Self {
        self.default = profile;
        self
    }

    /// Profile for a model name. Names containing `slow` are always slow.
    pub fn for_model(&self, model: &str) -> SpeedProfile {
        let tokens_per_second = if model.contains("slow") {
            SLOW_TOKENS_PER_SECOND
        } else {
            self.models
                .get(model)
                .copied()
                .unwrap_or(self.default.tokens_per_second)
        };
        SpeedProfile {
            tokens_per_second,
            ..self.default
        }
    }

    /// Named profile, or a model name from the table.
    pub fn named(&self, name: &str) -> Option<SpeedProfile> {
        self.named.get(name).copied().or_else(|| {
            self.models.get(name).map(|tps| SpeedProfile {
                tokens_per_second: *tps,
                ..self.default
            })
        })
    }
}
