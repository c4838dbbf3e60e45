//! Retry Mechanism Module
//!
//! Classification-driven retry with exponential backoff for provider calls.
//! Retryable errors (timeouts, connection failures, 429, 5xx) are retried up
//! to the policy's attempt limit; terminal errors fail on the first attempt.

mod executor;
mod policy;

pub use executor::{RetryExecutor, RetryOutcome};
pub use policy::RetryPolicy;
