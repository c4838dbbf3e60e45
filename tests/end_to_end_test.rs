//! Dispatcher -> HttpProviderClient -> emulator, with SQLite persistence.

use std::sync::Arc;
use std::time::Duration;

use polyprompt::emulator::{
    EmulatorConfig, ScriptedResponse, SpeedProfile, SpeedTable, StaticResponses, StoreReplay, serve,
};
use polyprompt::prelude::*;
use serde_json::{Value, json};
use tokio::net::TcpListener;

const PROMPT: &str = "What is 2+2?";

async fn spawn(config: EmulatorConfig) -> (String, CancelHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancelHandle::new();
    tokio::spawn(serve(listener, config, shutdown.clone()));
    (format!("http://{addr}"), shutdown)
}

fn emulator_config() -> EmulatorConfig {
    let source = StaticResponses::new()
        .with_response("gpt-4o", PROMPT, ScriptedResponse::answer("2+2 equals 4."))
        .with_response("claude-3-opus", PROMPT, ScriptedResponse::answer("Four."))
        .with_response("o1", PROMPT, ScriptedResponse::reasoned("Two plus two. ", "4"));
    EmulatorConfig::new(Arc::new(source)).with_speed_table(
        SpeedTable::new().with_default(SpeedProfile::new(Duration::from_millis(10), 200.0)),
    )
}

fn app_config(base: &str) -> AppConfig {
    let json = json!({
        "profiles": {
            "emu": { "base_url": format!("{base}/v1"), "api_key": "emu-key", "timeout_secs": 10 }
        },
        "models": [
            { "id": "gpt-4o", "profile": "emu" },
            { "id": "claude-3-opus", "profile": "emu", "wire": "anthropic" },
            { "id": "o1", "profile": "emu", "thinking": true }
        ],
        "retry": { "max_attempts": 2, "initial_delay_ms": 10 },
        "max_workers": 2
    });
    AppConfig::from_json_str(&json.to_string()).unwrap()
}

#[tokio::test]
async fn batch_against_emulator_streams_persists_and_replays() {
    let (base, shutdown) = spawn(emulator_config()).await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteConversationStore::open(dir.path().join("conversations.db"))
            .await
            .unwrap(),
    );
    let dispatcher = Dispatcher::from_config(
        &app_config(&base),
        Arc::new(HttpProviderClient::new().unwrap()),
        store.clone(),
    )
    .unwrap();

    for stream in [true, false] {
        let results = dispatcher
            .batch_process(["o1", "not-configured", "gpt-4o", "claude-3-opus"], PROMPT, 2, stream)
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.model_id()).collect();
        assert_eq!(ids, ["o1", "not-configured", "gpt-4o", "claude-3-opus"]);
        assert_eq!(results[0].text(), "Two plus two. 4");
        assert_eq!(results[1].error().unwrap().kind, ErrorKind::UnknownModel);
        assert_eq!(results[2].text(), "2+2 equals 4.");
        assert_eq!(results[3].text(), "Four.");
        for result in [&results[0], &results[2], &results[3]] {
            assert!(result.is_success(), "{}: {:?}", result.model_id(), result.error());
            assert_eq!(result.attempts(), 1);
            let usage = result.usage().unwrap();
            assert!(usage.completion_tokens > 0);
            assert!(!usage.estimated);
        }
        assert_eq!(results[0].usage().unwrap().reasoning_tokens, Some(3));
    }

    let stored = store.list(100, 0).await.unwrap();
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|s| s.record.usage.is_some()));
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total_conversations, 6);
    shutdown.cancel();

    // A second emulator replays what the first batch stored.
    let replay = EmulatorConfig::new(Arc::new(StoreReplay::new(store.clone())));
    let (replay_base, replay_shutdown) = spawn(replay).await;
    let response: Value = reqwest::Client::new()
        .post(format!("{replay_base}/v1/chat/completions"))
        .json(&json!({
            "model": "gpt-4o-replay",
            "stream": false,
            "messages": [{ "role": "user", "content": PROMPT }],
            "speed_profile": "fast"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["choices"][0]["message"]["content"], "2+2 equals 4.");
    replay_shutdown.cancel();
}

#[tokio::test]
async fn overloaded_emulator_exhausts_retries_and_stores_nothing() {
    let (base, shutdown) = spawn(emulator_config().with_failure_rate(1.0)).await;
    let store = Arc::new(InMemoryConversationStore::new());
    let dispatcher = Dispatcher::from_config(
        &app_config(&base),
        Arc::new(HttpProviderClient::new().unwrap()),
        store.clone(),
    )
    .unwrap();

    let report = dispatcher
        .batch_process_with(
            ["gpt-4o", "claude-3-opus"],
            PROMPT,
            &BatchOptions::new(2).with_stream(true),
            &CancelHandle::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.failed(), 2);
    for result in report.iter() {
        let error = result.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Server);
        assert_eq!(error.status, Some(503));
        assert_eq!(result.attempts(), 2);
    }
    assert!(store.is_empty().await);
    shutdown.cancel();
}

#[tokio::test]
async fn cancelling_a_slow_batch_returns_partial_results() {
    let slow = emulator_config().with_speed_table(
        SpeedTable::new()
            .with_model("gpt-4o", 1000.0)
            .with_model("claude-3-opus", 1.0)
            .with_default(SpeedProfile::new(Duration::from_millis(10), 1.0)),
    );
    let (base, shutdown) = spawn(slow).await;
    let dispatcher = Dispatcher::from_config(
        &app_config(&base),
        Arc::new(HttpProviderClient::new().unwrap()),
        Arc::new(InMemoryConversationStore::new()),
    )
    .unwrap();

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let report = dispatcher
        .batch_process_with(
            ["gpt-4o", "claude-3-opus"],
            PROMPT,
            &BatchOptions::new(2).with_stream(true),
            &cancel,
        )
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(report.results[0].is_success());
    assert_eq!(report.results[1].error().unwrap().kind, ErrorKind::Cancelled);
    assert!(report.elapsed < Duration::from_secs(3));
    shutdown.cancel();
}
