//! Per-reconcile cancellation and deadlines.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::StoreError;

/// Cancellation signal and per-call timeout for one reconcile invocation.
///
/// Store calls are the only suspension points of a reconcile; each one is run
/// through [`ReconcileContext::call`] so it can be aborted.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    cancel: CancellationToken,
    call_timeout: Duration,
}

impl ReconcileContext {
    /// Create a context bound to `cancel`.
    pub fn new(cancel: CancellationToken, call_timeout: Duration) -> Self {
        Self {
            cancel,
            call_timeout,
        }
    }

    /// A context that is never cancelled, with a generous timeout.
    pub fn background() -> Self {
        Self::new(CancellationToken::new(), Duration::from_secs(30))
    }

    /// Run a store call, aborting it on cancellation or when the timeout elapses.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            result = tokio::time::timeout(self.call_timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(StoreError::Timeout(self.call_timeout)),
            },
        }
    }
}
