//! Application configuration.
//!
//! Loaded once at startup from a JSON document:
//!
//! ```json
//! {
//!   "profiles": {
//!     "openai": { "base_url": "https://api.openai.com/v1", "api_key_env": "OPENAI_API_KEY" },
//!     "local":  { "base_url": "http://127.0.0.1:8000/v1", "api_key": "unused", "timeout_secs": 30 }
//!   },
//!   "models": [
//!     { "id": "gpt-4o", "profile": "openai" },
//!     { "id": "o3-mini", "profile": "openai", "thinking": true },
//!     { "id": "claude-3-7-sonnet-20250219", "profile": "anthropic", "wire": "anthropic" }
//!   ],
//!   "retry": { "max_attempts": 3, "initial_delay_ms": 1000, "backoff_multiplier": 2.0 },
//!   "max_workers": 4
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::types::{DEFAULT_TIMEOUT, ProviderProfile, WireStyle};

/// Environment variable holding the path of the configuration file.
pub const CONFIG_ENV_VAR: &str = "POLYPROMPT_CONFIG";

pub const DEFAULT_MAX_WORKERS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

/// One provider endpoint. Exactly one of `api_key` / `api_key_env` should be set.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for ProfileConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("proxy", &self.proxy)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl ProfileConfig {
    /// Resolve the key, reading the named environment variable if needed.
    pub fn resolve_api_key(&self, profile_name: &str) -> Result<String, LlmError> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map_err(|_| {
                LlmError::ConfigurationError(format!(
                    "profile '{profile_name}': environment variable {var} is not set"
                ))
            }),
            None => Err(LlmError::ConfigurationError(format!(
                "profile '{profile_name}' has neither api_key nor api_key_env"
            ))),
        }
    }

    pub fn build(&self, name: &str) -> Result<ProviderProfile, LlmError> {
        if self.base_url.trim().is_empty() {
            return Err(LlmError::ConfigurationError(format!(
                "profile '{name}' has an empty base_url"
            )));
        }
        let mut profile = ProviderProfile::new(name, &self.base_url, self.resolve_api_key(name)?)
            .with_timeout(
                self.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_TIMEOUT),
            );
        if let Some(proxy) = &self.proxy {
            profile = profile.with_proxy(proxy);
        }
        Ok(profile)
    }
}

/// Catalog entry: model id on a named profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub profile: String,
    #[serde(default)]
    pub thinking: bool,
    #[serde(default)]
    pub wire: WireStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryConfig::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "RetryConfig::default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "RetryConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        3
    }

    fn default_initial_delay_ms() -> u64 {
        1000
    }

    fn default_backoff_multiplier() -> f64 {
        2.0
    }

    fn default_max_delay_ms() -> u64 {
        60_000
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_delay_ms: Self::default_initial_delay_ms(),
            backoff_multiplier: Self::default_backoff_multiplier(),
            max_delay_ms: Self::default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new()
            .with_max_attempts(config.max_attempts)
            .with_initial_delay(Duration::from_millis(config.initial_delay_ms))
            .with_backoff_multiplier(config.backoff_multiplier)
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter(config.jitter)
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, LlmError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LlmError::ConfigurationError(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LlmError::ConfigurationError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Load from the file named by `POLYPROMPT_CONFIG`.
    pub fn from_env() -> Result<Self, LlmError> {
        let path = std::env::var(CONFIG_ENV_VAR).map_err(|_| {
            LlmError::ConfigurationError(format!("{CONFIG_ENV_VAR} is not set"))
        })?;
        Self::from_file(path)
    }

    /// Structural checks that do not touch the environment.
    pub fn validate(&self) -> Result<(), LlmError> {
        if self.max_workers == 0 {
            return Err(LlmError::ConfigurationError(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(LlmError::ConfigurationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        for model in &self.models {
            if !self.profiles.contains_key(&model.profile) {
                return Err(LlmError::ConfigurationError(format!(
                    "model '{}' refers to unknown profile '{}'",
                    model.id, model.profile
                )));
            }
        }
        Ok(())
    }

    /// Build every profile, resolving keys.
    pub fn build_profiles(&self) -> Result<BTreeMap<String, Arc<ProviderProfile>>, LlmError> {
        self.profiles
            .iter()
            .map(|(name, profile)| Ok((name.clone(), Arc::new(profile.build(name)?))))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "profiles": {
            "local": { "base_url": "http://127.0.0.1:8000/v1/", "api_key": "k", "timeout_secs": 7 }
        },
        "models": [
            { "id": "gpt-4o", "profile": "local" },
            { "id": "claude-3-opus", "profile": "local", "wire": "anthropic", "thinking": true }
        ],
        "retry": { "max_attempts": 5, "initial_delay_ms": 10 }
    }"#;

    #[test]
    fn parses_and_fills_defaults() {
        let config = AppConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.models[0].wire, WireStyle::OpenAiCompatible);
        assert_eq!(config.models[1].wire, WireStyle::Anthropic);

        let profiles = config.build_profiles().unwrap();
        let local = &profiles["local"];
        assert_eq!(local.base_url(), "http://127.0.0.1:8000/v1");
        assert_eq!(local.timeout(), Duration::from_secs(7));

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
    }

    #[test]
    fn rejects_unknown_profile_reference() {
        let json = r#"{ "models": [ { "id": "m", "profile": "missing" } ] }"#;
        let err = AppConfig::from_json_str(json).unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
    }

    #[test]
    fn missing_key_source_is_a_configuration_error() {
        let profile = ProfileConfig {
            base_url: "http://x".into(),
            ..Default::default()
        };
        assert!(matches!(
            profile.build("p"),
            Err(LlmError::ConfigurationError(_))
        ));
    }

    #[test]
    fn debug_hides_inline_key() {
        let profile = ProfileConfig {
            base_url: "http://x".into(),
            api_key: Some("sk-very-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{profile:?}").contains("sk-very-secret"));
    }
}
