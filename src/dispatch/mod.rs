//! Batch dispatch
//!
//! [`BatchDispatcher`] fans one prompt out to many [`ModelTarget`]s through a
//! semaphore-bounded pool of tokio tasks, retries each call under a
//! [`RetryPolicy`], persists successes and returns the results in input
//! order. [`Dispatcher`] adds catalog lookup on top, so callers can address
//! models by identifier.

mod batch;
mod report;

pub use batch::BatchDispatcher;
pub use report::BatchReport;

use std::sync::Arc;
use std::time::Duration;

use batch::Slot;

use crate::cancel::CancelHandle;
use crate::catalog::ModelCatalog;
use crate::client::{ProviderClient, ReasoningEffort, SendOptions, ThinkingMode};
use crate::config::{AppConfig, DEFAULT_MAX_WORKERS};
use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::store::ConversationStore;
use crate::types::{CompletionResult, ModelTarget, Prompt};

/// Options for one batch call.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Upper bound on concurrently active model requests.
    pub max_workers: usize,
    /// Options passed to every provider call of the batch.
    pub send: SendOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            send: SendOptions::default(),
        }
    }
}

impl BatchOptions {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.send.stream = stream;
        self
    }

    pub fn with_thinking_mode(mut self, mode: ThinkingMode) -> Self {
        self.send.thinking_mode = mode;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.send.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.send.reasoning_effort = Some(effort);
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.send.thinking_budget = Some(budget);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.send.timeout = Some(timeout);
        self
    }

    pub fn with_send_options(mut self, send: SendOptions) -> Self {
        self.send = send;
        self
    }
}

/// Catalog-aware entry point.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    catalog: ModelCatalog,
    batch: BatchDispatcher,
    default_max_workers: usize,
}

impl Dispatcher {
    pub fn new(catalog: ModelCatalog, batch: BatchDispatcher) -> Self {
        Self {
            catalog,
            batch,
            default_max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Build catalog, retry policy and worker default from configuration.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ProviderClient>,
        store: Arc<dyn ConversationStore>,
    ) -> Result<Self, LlmError> {
        let catalog = ModelCatalog::from_config(config)?;
        let batch = BatchDispatcher::new(client, store, config.retry_policy());
        Ok(Self {
            catalog,
            batch,
            default_max_workers: config.max_workers,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.batch = self.batch.with_retry_policy(policy);
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn batch(&self) -> &BatchDispatcher {
        &self.batch
    }

    pub fn default_max_workers(&self) -> usize {
        self.default_max_workers
    }

    /// Send `prompt` to every model in `models`.
    ///
    /// Returns exactly one result per requested model, in request order.
    /// Models missing from the catalog come back as failed results of kind
    /// `unknown_model`.
    pub async fn batch_process<I, S>(
        &self,
        models: I,
        prompt: impl Into<Prompt>,
        max_workers: usize,
        stream: bool,
    ) -> Result<Vec<CompletionResult>, LlmError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = BatchOptions::new(max_workers).with_stream(stream);
        let report = self
            .batch_process_with(models, prompt, &options, &CancelHandle::new())
            .await?;
        Ok(report.into_results())
    }

    /// Like [`Dispatcher::batch_process`] with full options, cancellation
    /// and the batch summary.
    pub async fn batch_process_with<I, S>(
        &self,
        models: I,
        prompt: impl Into<Prompt>,
        options: &BatchOptions,
        cancel: &CancelHandle,
    ) -> Result<BatchReport, LlmError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let slots = models
            .into_iter()
            .map(|model| {
                let model = model.as_ref();
                match self.catalog.lookup(model) {
                    Ok(target) => Slot::Target(target.clone()),
                    Err(error) => Slot::Rejected {
                        model_id: model.to_string(),
                        error,
                    },
                }
            })
            .collect();
        self.batch
            .run_slots(&prompt.into(), slots, options, cancel)
            .await
    }

    /// Resolve ids without sending anything.
    pub fn resolve(&self, models: &[&str]) -> Result<Vec<ModelTarget>, LlmError> {
        models
            .iter()
            .map(|m| self.catalog.lookup(m).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::client::ProviderResponse;
    use crate::error::ErrorKind;
    use crate::store::{ConversationStore, InMemoryConversationStore, StoreError, StoreStats};
    use crate::types::{ConversationRecord, ProviderProfile, RecordId, StoredConversation, Usage};
    use tracing_test::traced_test;

    /// Scripted client: per model, a delay and a queue of outcomes.
    #[derive(Default)]
    struct ScriptedClient {
        delays: HashMap<String, Duration>,
        failures: Mutex<HashMap<String, Vec<LlmError>>>,
        calls: Mutex<HashMap<String, u32>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedClient {
        fn with_delay(mut self, model: &str, delay: Duration) -> Self {
            self.delays.insert(model.to_string(), delay);
            self
        }

        fn with_failures(self, model: &str, errors: Vec<LlmError>) -> Self {
            if let Ok(mut failures) = self.failures.lock() {
                failures.insert(model.to_string(), errors);
            }
            self
        }

        fn calls(&self, model: &str) -> u32 {
            self.calls.lock().unwrap().get(model).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ProviderClient for ScriptedClient {
        async fn send(
            &self,
            prompt: &Prompt,
            target: &ModelTarget,
            _options: &SendOptions,
        ) -> Result<ProviderResponse, LlmError> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(target.id().to_string())
                .or_default() += 1;
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(target.id()) {
                tokio::time::sleep(*delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            let scripted = {
                let mut failures = self.failures.lock().unwrap();
                failures.get_mut(target.id()).and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                })
            };
            match scripted {
                Some(error) => Err(error),
                None => Ok(ProviderResponse::text(
                    format!("{} says {}", target.id(), prompt.text()),
                    Usage::new(1, 3),
                )),
            }
        }
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl ConversationStore for BrokenStore {
        async fn append(&self, _record: ConversationRecord) -> Result<RecordId, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn get(&self, _id: RecordId) -> Result<Option<StoredConversation>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn list(&self, _limit: u32, _offset: u32) -> Result<Vec<StoredConversation>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn search(
            &self,
            _query: &str,
            _limit: u32,
            _offset: u32,
        ) -> Result<Vec<StoredConversation>, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn stats(&self) -> Result<StoreStats, StoreError> {
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    fn profile() -> Arc<ProviderProfile> {
        Arc::new(ProviderProfile::new("mock", "http://mock", "key"))
    }

    fn catalog(models: &[&str]) -> ModelCatalog {
        models
            .iter()
            .fold(ModelCatalog::new(), |c, m| c.with_model(*m, profile()))
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order_despite_skewed_latency() {
        let client = Arc::new(
            ScriptedClient::default()
                .with_delay("slow", Duration::from_millis(900))
                .with_delay("medium", Duration::from_millis(300))
                .with_delay("fast", Duration::from_millis(10)),
        );
        let store = Arc::new(InMemoryConversationStore::new());
        let dispatcher = Dispatcher::new(
            catalog(&["slow", "medium", "fast"]),
            BatchDispatcher::new(client, store.clone(), fast_policy()),
        );

        for _ in 0..3 {
            let results = dispatcher
                .batch_process(["slow", "medium", "fast"], "hi", 3, false)
                .await
                .unwrap();
            let ids: Vec<_> = results.iter().map(|r| r.model_id()).collect();
            assert_eq!(ids, ["slow", "medium", "fast"]);
            assert!(results.iter().all(|r| r.is_success()));
        }
        assert_eq!(store.len().await, 9);
    }

    #[tokio::test(start_paused = true)]
    async fn m2_recovers_after_two_retryable_failures() {
        let client = Arc::new(ScriptedClient::default().with_failures(
            "m2",
            vec![
                LlmError::api_error(503, "unavailable"),
                LlmError::TimeoutError("timed out".into()),
            ],
        ));
        let store = Arc::new(InMemoryConversationStore::new());
        let dispatcher = Dispatcher::new(
            catalog(&["m1", "m2"]),
            BatchDispatcher::new(client.clone(), store.clone(), fast_policy()),
        );

        let results = dispatcher
            .batch_process(["m1", "m2"], "hi", 2, false)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].model_id(), "m1");
        assert_eq!(results[1].model_id(), "m2");
        assert!(results[0].is_success() && results[1].is_success());
        assert_eq!(results[0].attempts(), 1);
        assert_eq!(results[1].attempts(), 3);
        assert_eq!(client.calls("m2"), 3);

        // Only the final attempt is persisted.
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn store_failure_is_logged_and_success_stands() {
        let dispatcher = Dispatcher::new(
            catalog(&["m1"]),
            BatchDispatcher::new(
                Arc::new(ScriptedClient::default()),
                Arc::new(BrokenStore),
                fast_policy(),
            ),
        );

        let report = dispatcher
            .batch_process_with(["m1"], "hi", &BatchOptions::new(1), &CancelHandle::new())
            .await
            .unwrap();

        assert!(report.results[0].is_success());
        assert_eq!(report.results[0].text(), "m1 says hi");
        assert_eq!(report.record_ids, [None]);
        assert!(logs_contain("failed to persist conversation"));
        assert!(logs_contain("disk full"));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_and_unknown_models_keep_their_slots() {
        let client = Arc::new(
            ScriptedClient::default()
                .with_failures("bad", vec![LlmError::api_error(400, "invalid request")]),
        );
        let store = Arc::new(InMemoryConversationStore::new());
        let dispatcher = Dispatcher::new(
            catalog(&["good", "bad"]),
            BatchDispatcher::new(client.clone(), store.clone(), fast_policy()),
        );

        let cancel = CancelHandle::new();
        let report = dispatcher
            .batch_process_with(
                ["good", "missing", "bad"],
                "hi",
                &BatchOptions::new(2),
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        assert!(report.results[0].is_success());
        assert_eq!(
            report.results[1].error().unwrap().kind,
            ErrorKind::UnknownModel
        );
        assert_eq!(report.results[2].error().unwrap().kind, ErrorKind::Client);
        assert_eq!(client.calls("bad"), 1);
        assert_eq!((report.succeeded(), report.failed()), (1, 2));
        assert!(report.record_ids[0].is_some());
        assert!(report.record_ids[1].is_none() && report.record_ids[2].is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_pool_bounds_concurrency() {
        let mut client = ScriptedClient::default();
        let names: Vec<String> = (0..8).map(|i| format!("m{i}")).collect();
        for name in &names {
            client = client.with_delay(name, Duration::from_millis(100));
        }
        let client = Arc::new(client);
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dispatcher = Dispatcher::new(
            catalog(&refs),
            BatchDispatcher::new(
                client.clone(),
                Arc::new(InMemoryConversationStore::new()),
                fast_policy(),
            ),
        );

        let results = dispatcher.batch_process(&refs, "hi", 3, true).await.unwrap();
        assert_eq!(results.len(), 8);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn contract_violations_fail_the_whole_batch() {
        let dispatcher = Dispatcher::new(
            catalog(&["m"]),
            BatchDispatcher::new(
                Arc::new(ScriptedClient::default()),
                Arc::new(InMemoryConversationStore::new()),
                fast_policy(),
            ),
        );
        let empty: [&str; 0] = [];
        assert!(matches!(
            dispatcher.batch_process(empty, "hi", 1, false).await,
            Err(LlmError::InvalidInput(_))
        ));
        assert!(matches!(
            dispatcher.batch_process(["m"], "hi", 0, false).await,
            Err(LlmError::InvalidInput(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_completed_results_and_cancels_the_rest() {
        let client = Arc::new(
            ScriptedClient::default()
                .with_delay("quick", Duration::from_millis(10))
                .with_delay("stuck", Duration::from_secs(3600)),
        );
        let dispatcher = Dispatcher::new(
            catalog(&["quick", "stuck"]),
            BatchDispatcher::new(
                client,
                Arc::new(InMemoryConversationStore::new()),
                fast_policy(),
            ),
        );

        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let report = dispatcher
            .batch_process_with(["quick", "stuck"], "hi", &BatchOptions::new(2), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.results[0].is_success());
        assert_eq!(
            report.results[1].error().unwrap().kind,
            ErrorKind::Cancelled
        );
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn batch_records_share_one_conversation_id() {
        let store = Arc::new(InMemoryConversationStore::new());
        let dispatcher = Dispatcher::new(
            catalog(&["a", "b"]),
            BatchDispatcher::new(
                Arc::new(ScriptedClient::default()),
                store.clone(),
                fast_policy(),
            ),
        );

        let report = dispatcher
            .batch_process_with(["a", "b"], "hi", &BatchOptions::new(2), &CancelHandle::new())
            .await
            .unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 2);
        for stored in records {
            assert_eq!(
                stored.record.conversation_id.as_deref(),
                Some(report.conversation_id.as_str())
            );
            assert!(stored.record.usage.is_some());
        }
    }
}
