use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{BatchOptions, BatchReport};
use crate::cancel::CancelHandle;
use crate::client::{ProviderClient, SendOptions};
use crate::error::LlmError;
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::store::ConversationStore;
use crate::types::{CompletionResult, ConversationRecord, ModelTarget, Prompt, RecordId};

/// One input position of a batch.
pub(crate) enum Slot {
    Target(ModelTarget),
    /// Failed before any network call (e.g. not in the catalog).
    Rejected { model_id: String, error: LlmError },
}

impl Slot {
    fn model_id(&self) -> &str {
        match self {
            Self::Target(target) => target.id(),
            Self::Rejected { model_id, .. } => model_id,
        }
    }
}

type WorkerOutput = (usize, CompletionResult, Option<RecordId>);

/// Fans one prompt out to many models over a bounded worker pool.
#[derive(Clone)]
pub struct BatchDispatcher {
    client: Arc<dyn ProviderClient>,
    store: Arc<dyn ConversationStore>,
    executor: RetryExecutor,
}

impl std::fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("policy", self.executor.policy())
            .finish_non_exhaustive()
    }
}

impl BatchDispatcher {
    pub fn new(
        client: Arc<dyn ProviderClient>,
        store: Arc<dyn ConversationStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            store,
            executor: RetryExecutor::new(policy),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = RetryExecutor::new(policy);
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Send `prompt` to every target and return one result per target in
    /// input order.
    ///
    /// Individual failures never abort the batch. The call itself only fails
    /// on an empty target list or `max_workers == 0`. Cancelling `cancel`
    /// stops in-flight requests and queued targets; they come back as failed
    /// results with kind `cancelled`.
    pub async fn run(
        &self,
        prompt: &Prompt,
        targets: &[ModelTarget],
        options: &BatchOptions,
        cancel: &CancelHandle,
    ) -> Result<BatchReport, LlmError> {
        let slots = targets.iter().cloned().map(Slot::Target).collect();
        self.run_slots(prompt, slots, options, cancel).await
    }

    pub(crate) async fn run_slots(
        &self,
        prompt: &Prompt,
        slots: Vec<Slot>,
        options: &BatchOptions,
        cancel: &CancelHandle,
    ) -> Result<BatchReport, LlmError> {
        if slots.is_empty() {
            return Err(LlmError::InvalidInput(
                "model list must not be empty".to_string(),
            ));
        }
        if options.max_workers == 0 {
            return Err(LlmError::InvalidInput(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let started = tokio::time::Instant::now();
        let conversation_id = prompt
            .conversation_id()
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let prompt = prompt.clone().with_conversation_id(&conversation_id);
        let model_ids: Vec<String> = slots.iter().map(|s| s.model_id().to_string()).collect();

        info!(
            conversation_id = %conversation_id,
            models = slots.len(),
            max_workers = options.max_workers,
            stream = options.send.stream,
            "dispatching batch"
        );

        let semaphore = Arc::new(Semaphore::new(options.max_workers));
        let mut workers: JoinSet<WorkerOutput> = JoinSet::new();
        let mut outputs: Vec<Option<(CompletionResult, Option<RecordId>)>> =
            (0..slots.len()).map(|_| None).collect();

        for (index, slot) in slots.into_iter().enumerate() {
            let target = match slot {
                Slot::Target(target) => target,
                Slot::Rejected { model_id, error } => {
                    warn!(model = %model_id, error = %error, "model rejected before dispatch");
                    outputs[index] = Some((
                        CompletionResult::failure(model_id, &error, Duration::ZERO, 0),
                        None,
                    ));
                    continue;
                }
            };
            let worker = Worker {
                client: Arc::clone(&self.client),
                store: Arc::clone(&self.store),
                executor: self.executor.clone(),
                prompt: prompt.clone(),
                target,
                send: options.send.clone(),
                cancel: cancel.clone(),
                semaphore: Arc::clone(&semaphore),
            };
            workers.spawn(async move {
                let (result, record_id) = worker.run().await;
                (index, result, record_id)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, result, record_id)) => outputs[index] = Some((result, record_id)),
                Err(e) => warn!(error = %e, "batch worker did not finish"),
            }
        }

        let mut results = Vec::with_capacity(outputs.len());
        let mut record_ids = Vec::with_capacity(outputs.len());
        for (output, model_id) in outputs.into_iter().zip(model_ids) {
            let (result, record_id) = output.unwrap_or_else(|| {
                let error = LlmError::InternalError("worker task aborted".to_string());
                (
                    CompletionResult::failure(model_id, &error, Duration::ZERO, 0),
                    None,
                )
            });
            results.push(result);
            record_ids.push(record_id);
        }

        let report = BatchReport {
            conversation_id,
            results,
            record_ids,
            elapsed: started.elapsed(),
            cancelled: cancel.is_cancelled(),
        };
        info!(
            conversation_id = %report.conversation_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }
}

/// Everything one spawned task owns.
struct Worker {
    client: Arc<dyn ProviderClient>,
    store: Arc<dyn ConversationStore>,
    executor: RetryExecutor,
    prompt: Prompt,
    target: ModelTarget,
    send: SendOptions,
    cancel: CancelHandle,
    semaphore: Arc<Semaphore>,
}

impl Worker {
    async fn run(self) -> (CompletionResult, Option<RecordId>) {
        let model_id = self.target.id();

        // Queue for a slot; cancellation releases queued targets too.
        let permit = match self
            .cancel
            .run_until_cancelled(Arc::clone(&self.semaphore).acquire_owned())
            .await
        {
            Some(Ok(permit)) => permit,
            Some(Err(_)) | None => {
                let error = LlmError::Cancelled(format!("request to {model_id} was cancelled"));
                return (
                    CompletionResult::failure(model_id, &error, Duration::ZERO, 0),
                    None,
                );
            }
        };

        let client = &self.client;
        let prompt = &self.prompt;
        let target = &self.target;
        let send = &self.send;
        let result = self
            .executor
            .execute(model_id, &self.cancel, move |_| client.send(prompt, target, send))
            .await;
        drop(permit);

        if !result.is_success() {
            if let Some(error) = result.error() {
                warn!(
                    model = model_id,
                    kind = %error.kind,
                    attempts = result.attempts(),
                    error = %error.message,
                    "model failed"
                );
            }
            return (result, None);
        }

        info!(
            model = model_id,
            attempts = result.attempts(),
            elapsed_ms = result.elapsed().as_millis() as u64,
            "model completed"
        );
        let record_id = self.persist(&result).await;
        (result, record_id)
    }

    /// Store failures are logged and never change the result.
    async fn persist(&self, result: &CompletionResult) -> Option<RecordId> {
        let mut record = ConversationRecord::new(self.target.id(), self.prompt.text(), result.text())
            .with_execution_time(result.elapsed().as_secs_f64())
            .with_metadata(json!({
                "stream": self.send.stream,
                "attempts": result.attempts(),
                "thinking": self.target.is_thinking(),
                "max_tokens": self.send.max_tokens,
                "reasoning_effort": self.send.reasoning_effort,
            }));
        if let Some(conversation_id) = self.prompt.conversation_id() {
            record = record.with_conversation_id(conversation_id);
        }
        if let Some(usage) = result.usage() {
            record = record.with_usage(*usage);
        }

        match self.store.append(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(model = self.target.id(), error = %e, "failed to persist conversation");
                None
            }
        }
    }
}
