//! HTTP surface of the emulator.
//!
//! Routes:
//! - `POST /chat/completions`, `POST /v1/chat/completions`: OpenAI-compatible
//! - `POST /messages`, `POST /v1/messages`: Anthropic-style
//!
//! Every connection gets its own [`StreamEmulator`]; the only shared state is
//! the read-only [`EmulatorConfig`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use futures::{Stream, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::wire::{Frame, WireEncoder, WireFormat, error_body, whole_shot_body};
use super::{
    ResponseSource, ScriptedResponse, SpeedProfile, SpeedProfileSpec, SpeedTable, StaticResponses,
    StreamEmulator, Tokenizer,
};
use crate::cancel::CancelHandle;
use crate::error::LlmError;

/// Read-only configuration shared by all connections.
#[derive(Clone)]
pub struct EmulatorConfig {
    pub speed_table: SpeedTable,
    /// Probability (0.0 to 1.0) of answering 503 before any byte is streamed.
    pub failure_rate: f64,
    pub source: Arc<dyn ResponseSource>,
}

impl std::fmt::Debug for EmulatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorConfig")
            .field("speed_table", &self.speed_table)
            .field("failure_rate", &self.failure_rate)
            .finish_non_exhaustive()
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::new(Arc::new(StaticResponses::always(ScriptedResponse::answer(
            "This is a simulated response from the emulator.",
        ))))
    }
}

impl EmulatorConfig {
    pub fn new(source: Arc<dyn ResponseSource>) -> Self {
        Self {
            speed_table: SpeedTable::default(),
            failure_rate: 0.0,
            source,
        }
    }

    pub fn with_speed_table(mut self, speed_table: SpeedTable) -> Self {
        self.speed_table = speed_table;
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        self
    }
}

#[derive(Clone)]
struct AppState {
    config: EmulatorConfig,
    shutdown: CancelHandle,
}

/// Router serving both wire dialects.
pub fn router(config: EmulatorConfig) -> Router {
    router_with_shutdown(config, CancelHandle::new())
}

fn router_with_shutdown(config: EmulatorConfig, shutdown: CancelHandle) -> Router {
    let state = AppState { config, shutdown };
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/messages", post(messages))
        .route("/v1/messages", post(messages))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled. Open streams are closed on shutdown.
pub async fn serve(
    listener: TcpListener,
    config: EmulatorConfig,
    shutdown: CancelHandle,
) -> Result<(), LlmError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, failure_rate = config.failure_rate, "emulator listening");
    }
    let app = router_with_shutdown(config, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| LlmError::InternalError(format!("emulator server failed: {e}")))?;
    info!("emulator stopped");
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ProfileQuery {
    #[serde(default)]
    profile: Option<String>,
}

async fn chat_completions(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
    body: Bytes,
) -> Response {
    handle(state, WireFormat::OpenAi, query, body).await
}

async fn messages(
    State(state): State<AppState>,
    Query(query): Query<ProfileQuery>,
    body: Bytes,
) -> Response {
    handle(state, WireFormat::Anthropic, query, body).await
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    speed_profile: Option<SpeedProfileField>,
    #[serde(default)]
    simulate_error: Option<SimulatedError>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl MessageContent {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks.into_iter().filter_map(|b| b.text).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpeedProfileField {
    Named(String),
    Custom(SpeedProfileSpec),
}

#[derive(Debug, Deserialize)]
struct SimulatedError {
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

/// A validated request.
#[derive(Debug)]
struct Parsed {
    model: String,
    prompt: String,
    stream: bool,
    profile: SpeedProfile,
    simulate_error: Option<(StatusCode, String)>,
}

fn parse_request(
    body: &[u8],
    query: &ProfileQuery,
    table: &SpeedTable,
) -> Result<Parsed, String> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))?;
    if request.model.trim().is_empty() {
        return Err("model must not be empty".to_string());
    }

    let prompt = request
        .messages
        .into_iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.into_text())
        .ok_or_else(|| "request has no user message".to_string())?;

    let named = |name: &str| {
        table
            .named(name)
            .ok_or_else(|| format!("unknown speed profile '{name}'"))
    };
    let mut profile = match query.profile.as_deref() {
        Some(name) => named(name)?,
        None => table.for_model(&request.model),
    };
    match request.speed_profile {
        Some(SpeedProfileField::Named(name)) => profile = named(&name)?,
        Some(SpeedProfileField::Custom(overlay)) => {
            profile = overlay.apply(profile).map_err(|e| e.to_string())?;
        }
        None => {}
    }

    let simulate_error = match request.simulate_error {
        Some(sim) => {
            let status = StatusCode::from_u16(sim.status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .ok_or_else(|| {
                    format!("simulate_error.status must be 4xx or 5xx, got {}", sim.status)
                })?;
            let message = sim
                .message
                .unwrap_or_else(|| format!("simulated error {}", status.as_u16()));
            Some((status, message))
        }
        None => None,
    };

    Ok(Parsed {
        model: request.model,
        prompt,
        stream: request.stream.unwrap_or(true),
        profile,
        simulate_error,
    })
}

fn error_response(format: WireFormat, status: StatusCode, message: &str) -> Response {
    (status, Json(error_body(format, status.as_u16(), message))).into_response()
}

async fn handle(state: AppState, format: WireFormat, query: ProfileQuery, body: Bytes) -> Response {
    let request = match parse_request(&body, &query, &state.config.speed_table) {
        Ok(request) => request,
        Err(message) => {
            debug!(error = %message, "rejecting malformed request");
            return error_response(format, StatusCode::BAD_REQUEST, &message);
        }
    };

    if let Some((status, message)) = &request.simulate_error {
        info!(model = %request.model, status = status.as_u16(), "simulated error");
        return error_response(format, *status, message);
    }
    if state.config.failure_rate > 0.0 && rand::thread_rng().r#gen::<f64>() < state.config.failure_rate {
        warn!(model = %request.model, "injected failure");
        return error_response(
            format,
            StatusCode::SERVICE_UNAVAILABLE,
            "the emulated server is overloaded",
        );
    }

    let scripted = match state.config.source.find(&request.model, &request.prompt).await {
        Ok(Some(scripted)) => scripted,
        Ok(None) => {
            info!(model = %request.model, "no response for prompt");
            return error_response(
                format,
                StatusCode::NOT_FOUND,
                &format!("no response found for model '{}' and this prompt", request.model),
            );
        }
        Err(e) => {
            warn!(model = %request.model, error = %e, "response source failed");
            return error_response(format, StatusCode::INTERNAL_SERVER_ERROR, &e.user_message());
        }
    };

    let prompt_tokens = Tokenizer::new().count(&request.prompt);
    let emulator = StreamEmulator::new(request.profile, &scripted);
    info!(
        model = %request.model,
        stream = request.stream,
        tokens = emulator.token_count(),
        tokens_per_second = request.profile.tokens_per_second,
        "emulating response"
    );

    let cancel = state.shutdown.child();
    if request.stream {
        let encoder = WireEncoder::new(format, request.model, prompt_tokens);
        Sse::new(sse_events(emulator, encoder, cancel))
            .keep_alive(KeepAlive::default())
            .into_response()
    } else {
        match emulator.whole_shot(&cancel).await {
            Some(generated) => {
                Json(whole_shot_body(format, &request.model, prompt_tokens, &generated)).into_response()
            }
            None => error_response(
                format,
                StatusCode::SERVICE_UNAVAILABLE,
                "the emulated server is shutting down",
            ),
        }
    }
}

fn sse_events(
    emulator: StreamEmulator,
    mut encoder: WireEncoder,
    cancel: CancelHandle,
) -> impl Stream<Item = Result<Event, Infallible>> + Send {
    let preamble = encoder.preamble();
    let chunks = emulator
        .into_stream(cancel)
        .flat_map(move |chunk| futures::stream::iter(encoder.encode(&chunk)));
    futures::stream::iter(preamble)
        .chain(chunks)
        .map(|frame| Ok(into_event(frame)))
}

fn into_event(frame: Frame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}
