//! Cleanup extension point invoked before the finalizer is released.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use taskdefine_core::TaskDefine;

/// Cleanup failed; the finalizer stays in place and deletion is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CleanupError(pub String);

/// Releases resources owned on behalf of a TaskDefine that is being deleted.
///
/// Implementations must be idempotent: a failed or interrupted deletion
/// runs cleanup again on the next reconcile.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    async fn cleanup(&self, object: &TaskDefine) -> Result<(), CleanupError>;
}

/// Cleanup hook for deployments that own nothing outside the TaskDefine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCleanup;

#[async_trait]
impl CleanupHook for NoopCleanup {
    async fn cleanup(&self, object: &TaskDefine) -> Result<(), CleanupError> {
        info!(
            namespace = %object.metadata.namespace,
            name = %object.metadata.name,
            "Cleaning up resources"
        );
        Ok(())
    }
}
