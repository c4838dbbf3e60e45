use std::future::Future;
use std::time::Instant;

use tracing::{debug, warn};

use super::RetryPolicy;
use crate::cancel::CancelHandle;
use crate::client::ProviderResponse;
use crate::error::LlmError;
use crate::types::{AttemptOutcome, CompletionResult, RequestAttempt};

/// Result of a retry loop plus the number of calls it made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, LlmError>,
    pub attempts: u32,
}

/// Runs one operation under a [`RetryPolicy`].
///
/// Backoff state lives on the stack of each call; executors can be shared
/// freely between workers.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Call `operation(attempt)` until it succeeds, fails terminally, the
    /// attempts run out, or `cancel` fires. Attempts are numbered from 1.
    pub async fn run<F, Fut, T>(
        &self,
        model_id: &str,
        cancel: &CancelHandle,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(cancelled(model_id)),
                    attempts: attempt - 1,
                };
            }

            let started_at = Instant::now();
            let error = match cancel.run_until_cancelled(operation(attempt)).await {
                None => {
                    return RetryOutcome {
                        result: Err(cancelled(model_id)),
                        attempts: attempt,
                    };
                }
                Some(Ok(value)) => {
                    log_attempt(&RequestAttempt {
                        model_id: model_id.to_string(),
                        attempt,
                        started_at,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Some(Err(error)) => error,
            };

            log_attempt(&RequestAttempt {
                model_id: model_id.to_string(),
                attempt,
                started_at,
                outcome: AttemptOutcome::Failed {
                    class: error.class(),
                    message: error.to_string(),
                },
            });

            if !self.policy.should_retry(&error) || attempt >= self.policy.max_attempts {
                return RetryOutcome {
                    result: Err(error),
                    attempts: attempt,
                };
            }

            let delay = self.policy.calculate_delay(attempt);
            warn!(
                model = model_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after retryable error"
            );
            if cancel
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return RetryOutcome {
                    result: Err(cancelled(model_id)),
                    attempts: attempt,
                };
            }
        }
    }

    /// Retry a provider call and fold the outcome into a [`CompletionResult`].
    ///
    /// Only the final attempt contributes content and token counts. A
    /// response that arrives without usage is treated as a parse failure.
    pub async fn execute<F, Fut>(
        &self,
        model_id: &str,
        cancel: &CancelHandle,
        operation: F,
    ) -> CompletionResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<ProviderResponse, LlmError>>,
    {
        let start = tokio::time::Instant::now();
        let outcome = self.run(model_id, cancel, operation).await;
        let elapsed = start.elapsed();

        let response = outcome.result.and_then(|response| match response.usage {
            Some(usage) => Ok((response.content, usage)),
            None => Err(LlmError::ParseError(
                "response has no token usage".to_string(),
            )),
        });
        match response {
            Ok((content, usage)) => {
                CompletionResult::success(model_id, content, usage, elapsed, outcome.attempts)
            }
            Err(error) => CompletionResult::failure(model_id, &error, elapsed, outcome.attempts),
        }
    }
}

fn cancelled(model_id: &str) -> LlmError {
    LlmError::Cancelled(format!("request to {model_id} was cancelled"))
}

fn log_attempt(attempt: &RequestAttempt) {
    match &attempt.outcome {
        AttemptOutcome::Succeeded => debug!(
            model = %attempt.model_id,
            attempt = attempt.attempt,
            elapsed_ms = attempt.elapsed().as_millis() as u64,
            "attempt succeeded"
        ),
        AttemptOutcome::Failed { class, message } => debug!(
            model = %attempt.model_id,
            attempt = attempt.attempt,
            elapsed_ms = attempt.elapsed().as_millis() as u64,
            ?class,
            error = %message,
            "attempt failed"
        ),
    }
}
