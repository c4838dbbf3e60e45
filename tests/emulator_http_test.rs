//! The emulator served over a real socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use polyprompt::LlmError;
use polyprompt::cancel::CancelHandle;
use polyprompt::emulator::{EmulatorConfig, ScriptedResponse, StaticResponses, serve};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Running {
    base: String,
    shutdown: CancelHandle,
    handle: JoinHandle<Result<(), LlmError>>,
}

async fn spawn(config: EmulatorConfig) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancelHandle::new();
    let handle = tokio::spawn(serve(listener, config, shutdown.clone()));
    Running {
        base: format!("http://{addr}"),
        shutdown,
        handle,
    }
}

fn scripted() -> EmulatorConfig {
    EmulatorConfig::new(Arc::new(
        StaticResponses::new()
            .with_response("gpt-4o", "What is 2+2?", ScriptedResponse::answer("The answer is 4."))
            .with_model_response("o1", ScriptedResponse::reasoned("Adding two and two. ", "4")),
    ))
}

fn fast(total_tokens: u32) -> Value {
    json!({ "time_to_first_token": 0.0, "tokens_per_second": 200.0, "total_tokens": total_tokens })
}

async fn post(base: &str, path: &str, body: impl Into<reqwest::Body>) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}{path}"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn malformed_body_is_a_400_in_provider_shape() {
    let emulator = spawn(scripted()).await;
    let response = post(&emulator.base, "/v1/chat/completions", "{ not json").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");

    let response = post(&emulator.base, "/v1/messages", r#"{"model":"m","messages":[]}"#).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "error");
}

#[tokio::test]
async fn unmatched_prompt_is_a_404() {
    let emulator = spawn(scripted()).await;
    let body = json!({
        "model": "gpt-4o",
        "messages": [{ "role": "user", "content": "something else" }]
    });
    let response = post(&emulator.base, "/chat/completions", body.to_string()).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn simulate_error_and_failure_rate() {
    let emulator = spawn(scripted()).await;
    let body = json!({
        "model": "o1",
        "messages": [{ "role": "user", "content": "x" }],
        "simulate_error": { "status": 429, "message": "slow down" }
    });
    let response = post(&emulator.base, "/chat/completions", body.to_string()).await;
    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "slow down");
    assert_eq!(body["error"]["type"], "rate_limit_error");

    let flaky = spawn(scripted().with_failure_rate(1.0)).await;
    let body = json!({ "model": "o1", "messages": [{ "role": "user", "content": "x" }] });
    let response = post(&flaky.base, "/chat/completions", body.to_string()).await;
    assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn openai_stream_emits_one_event_per_token_then_done() {
    let emulator = spawn(scripted()).await;
    let body = json!({
        "model": "gpt-4o",
        "messages": [{ "role": "user", "content": "What is 2+2?" }],
        "speed_profile": fast(5)
    });
    let response = post(&emulator.base, "/v1/chat/completions", body.to_string()).await;
    assert_eq!(response.status(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let text = response.text().await.unwrap();
    let data: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    // 5 tokens, the terminal chunk with usage, the sentinel.
    assert_eq!(data.len(), 7);
    assert_eq!(*data.last().unwrap(), "[DONE]");

    let terminal: Value = serde_json::from_str(data[5]).unwrap();
    assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
    assert_eq!(terminal["usage"]["completion_tokens"], 5);
    let first: Value = serde_json::from_str(data[0]).unwrap();
    assert_eq!(first["object"], "chat.completion.chunk");
}

#[tokio::test]
async fn anthropic_stream_ends_with_message_stop() {
    let emulator = spawn(scripted()).await;
    let body = json!({
        "model": "o1",
        "max_tokens": 100,
        "messages": [{ "role": "user", "content": [{ "type": "text", "text": "think" }] }],
        "speed_profile": { "time_to_first_token": 0.0, "tokens_per_second": 500.0 }
    });
    let text = post(&emulator.base, "/v1/messages", body.to_string())
        .await
        .text()
        .await
        .unwrap();

    let events: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(str::trim)
        .collect();
    assert_eq!(events.first(), Some(&"message_start"));
    assert_eq!(events.last(), Some(&"message_stop"));
    assert!(text.contains("thinking_delta"));
    assert!(text.contains("text_delta"));
}

#[tokio::test]
async fn whole_shot_waits_for_generation_time() {
    let emulator = spawn(scripted()).await;
    let body = json!({
        "model": "gpt-4o",
        "stream": false,
        "messages": [{ "role": "user", "content": "What is 2+2?" }],
        "speed_profile": { "time_to_first_token": 0.1, "tokens_per_second": 50.0, "total_tokens": 10 }
    });
    let started = Instant::now();
    let response = post(&emulator.base, "/chat/completions", body.to_string()).await;
    let body: Value = response.json().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(300));

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["usage"]["completion_tokens"], 10);
    assert!(body["choices"][0]["message"]["content"].as_str().unwrap().starts_with("The answer"));
}

#[tokio::test]
async fn shutdown_stops_the_server() {
    let emulator = spawn(EmulatorConfig::default()).await;
    emulator.shutdown.cancel();
    let outcome = tokio::time::timeout(Duration::from_secs(5), emulator.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
}
