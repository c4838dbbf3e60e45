//! Cancellation utilities
//!
//! A single abort signal shared by every worker of a batch and by every
//! emulated stream.

use std::future::Future;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Futures raced against this handle stop at their
    /// next await point; dropping them closes any open HTTP connection.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// A handle that is cancelled with this one but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Run `future` unless cancellation wins the race. Returns `None` when cancelled.
    pub async fn run_until_cancelled<F>(&self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            out = future => Some(out),
        }
    }
}
