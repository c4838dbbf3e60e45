//! Provider profiles and model targets.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default per-call timeout when a profile does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Request/response wire format spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireStyle {
    /// `POST {base}/chat/completions`, bearer auth.
    #[default]
    #[serde(rename = "openai", alias = "openai_compatible")]
    OpenAiCompatible,
    /// `POST {base}/messages`, `x-api-key` auth.
    Anthropic,
}

/// Connection parameters for one provider endpoint.
pub struct ProviderProfile {
    name: String,
    base_url: String,
    api_key: SecretString,
    proxy: Option<String>,
    timeout: Duration,
}

impl ProviderProfile {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            name: name.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            proxy: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

impl std::fmt::Debug for ProviderProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderProfile")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("proxy", &self.proxy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One model on one provider profile.
#[derive(Debug, Clone)]
pub struct ModelTarget {
    id: String,
    profile: Arc<ProviderProfile>,
    thinking: bool,
    wire: WireStyle,
}

impl ModelTarget {
    pub fn new(id: impl Into<String>, profile: Arc<ProviderProfile>) -> Self {
        Self {
            id: id.into(),
            profile,
            thinking: false,
            wire: WireStyle::default(),
        }
    }

    /// Mark the model as a reasoning model that may emit a thinking segment.
    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn with_wire_style(mut self, wire: WireStyle) -> Self {
        self.wire = wire;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn wire_style(&self) -> WireStyle {
        self.wire
    }
}
