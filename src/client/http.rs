use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::Client;
use tracing::{debug, trace};

use super::{
    ProviderClient, ProviderResponse, SendOptions, StreamAccumulator, anthropic,
    classify_http_error, openai,
};
use crate::error::LlmError;
use crate::types::{ModelTarget, Prompt, WireStyle};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `reqwest`-backed client for both wire styles.
///
/// Connection pools are shared by every worker. Profiles with a proxy get
/// their own pooled client, built on first use.
#[derive(Debug)]
pub struct HttpProviderClient {
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl HttpProviderClient {
    pub fn new() -> Result<Self, LlmError> {
        Ok(Self {
            direct: Self::builder().build().map_err(|e| {
                LlmError::ConfigurationError(format!("cannot build HTTP client: {e}"))
            })?,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    /// Use a pre-configured client for direct connections.
    pub fn with_client(client: Client) -> Self {
        Self {
            direct: client,
            proxied: Mutex::new(HashMap::new()),
        }
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder().connect_timeout(CONNECT_TIMEOUT)
    }

    fn client_for(&self, target: &ModelTarget) -> Result<Client, LlmError> {
        let Some(proxy_url) = target.profile().proxy() else {
            return Ok(self.direct.clone());
        };
        let mut cache = self
            .proxied
            .lock()
            .map_err(|_| LlmError::InternalError("proxy client cache poisoned".to_string()))?;
        if let Some(client) = cache.get(proxy_url) {
            return Ok(client.clone());
        }
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            LlmError::ConfigurationError(format!("invalid proxy '{proxy_url}': {e}"))
        })?;
        let client = Self::builder().proxy(proxy).build().map_err(|e| {
            LlmError::ConfigurationError(format!("cannot build proxied HTTP client: {e}"))
        })?;
        cache.insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }

    fn build_request(
        &self,
        prompt: &Prompt,
        target: &ModelTarget,
        options: &SendOptions,
    ) -> Result<reqwest::RequestBuilder, LlmError> {
        let client = self.client_for(target)?;
        let profile = target.profile();
        let request = match target.wire_style() {
            WireStyle::OpenAiCompatible => client
                .post(format!("{}{}", profile.base_url(), openai::CHAT_PATH))
                .bearer_auth(profile.api_key())
                .json(&openai::build_request_body(prompt, target, options)),
            WireStyle::Anthropic => client
                .post(format!("{}{}", profile.base_url(), anthropic::MESSAGES_PATH))
                .header("x-api-key", profile.api_key())
                .header("anthropic-version", anthropic::API_VERSION)
                .json(&anthropic::build_request_body(prompt, target, options)),
        };
        Ok(request)
    }

    /// Turn a non-2xx response into a classified error.
    async fn check_status(
        target: &ModelTarget,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(classify_http_error(
            target.profile().name(),
            status.as_u16(),
            &body,
            &headers,
        ))
    }

    async fn send_whole_shot(
        &self,
        prompt: &Prompt,
        target: &ModelTarget,
        options: &SendOptions,
        timeout: Duration,
    ) -> Result<ProviderResponse, LlmError> {
        let request = self.build_request(prompt, target, options)?.timeout(timeout);
        let response = Self::check_status(target, request.send().await?).await?;
        let body = response.text().await?;
        match target.wire_style() {
            WireStyle::OpenAiCompatible => openai::parse_response(&body, target, options),
            WireStyle::Anthropic => anthropic::parse_response(&body, target, options),
        }
    }

    /// Streaming call. The timeout bounds the wait for headers and every gap
    /// between events, not the total stream length.
    async fn send_streaming(
        &self,
        prompt: &Prompt,
        target: &ModelTarget,
        options: &SendOptions,
        timeout: Duration,
    ) -> Result<ProviderResponse, LlmError> {
        let request = self.build_request(prompt, target, options)?;
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| {
                LlmError::TimeoutError(format!(
                    "no response headers from {} within {timeout:?}",
                    target.id()
                ))
            })??;
        let response = Self::check_status(target, response).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut acc = StreamAccumulator::new(target.is_thinking());
        loop {
            let next = tokio::time::timeout(timeout, events.next())
                .await
                .map_err(|_| {
                    LlmError::TimeoutError(format!(
                        "stream from {} idle for {timeout:?}",
                        target.id()
                    ))
                })?;
            let Some(event) = next else {
                debug!(model = target.id(), "stream closed without terminal event");
                break;
            };
            let event =
                event.map_err(|e| LlmError::StreamError(format!("SSE stream error: {e}")))?;
            trace!(model = target.id(), event = %event.event, "sse event");

            match target.wire_style() {
                WireStyle::OpenAiCompatible => openai::apply_stream_data(&event.data, &mut acc)?,
                WireStyle::Anthropic => {
                    anthropic::apply_stream_event(&event.event, &event.data, &mut acc)?
                }
            }
            if acc.is_finished() {
                break;
            }
        }

        debug!(
            model = target.id(),
            chunks = acc.chunk_count(),
            "stream accumulated"
        );
        Ok(acc.into_response(prompt.text(), options.thinking_mode))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn send(
        &self,
        prompt: &Prompt,
        target: &ModelTarget,
        options: &SendOptions,
    ) -> Result<ProviderResponse, LlmError> {
        let timeout = options.timeout_for(target);
        debug!(
            model = target.id(),
            provider = target.profile().name(),
            stream = options.stream,
            "sending request"
        );
        if options.stream {
            self.send_streaming(prompt, target, options, timeout).await
        } else {
            self.send_whole_shot(prompt, target, options, timeout).await
        }
    }
}
