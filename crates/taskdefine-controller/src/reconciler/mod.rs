//! TaskDefine reconciliation.
//!
//! [`Reconciler::reconcile`] routes each request to the deletion path or the
//! live path based on the deletion marker:
//!
//! - deletion: run cleanup, then release the finalizer
//! - live: ensure the finalizer, then validate and sync status
//!
//! Every phase works on the snapshot fetched at the start of the call and
//! plans its write before issuing it; no state is kept between calls.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use taskdefine_core::{ObjectKey, TaskDefine};

use crate::config::RequeuePolicy;
use crate::context::ReconcileContext;
use crate::metrics::ControllerMetrics;
use crate::store::{ResourceStore, StoreError};

pub mod cleanup;
pub mod finalizer;
pub mod status;

pub use cleanup::{CleanupError, CleanupHook, NoopCleanup};
pub use finalizer::{EnsureOutcome, FinalizerManager};
pub use status::StatusSynchronizer;

/// What the control loop should do after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Nothing more to do until the next change notification.
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Reconcile again after `after`.
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Requested delay before the next reconcile, if any.
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Reconcile errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to get TaskDefine: {0}")]
    Fetch(#[source] StoreError),

    #[error("Failed to add finalizer: {0}")]
    AddFinalizer(#[source] StoreError),

    #[error("Failed to cleanup resources: {0}")]
    Cleanup(#[source] CleanupError),

    #[error("Failed to remove finalizer: {0}")]
    RemoveFinalizer(#[source] StoreError),

    #[error("Failed to update status: {0}")]
    StatusUpdate(#[source] StoreError),
}

impl ReconcileError {
    /// The underlying store error, if this failure came from the store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Fetch(e)
            | Self::AddFinalizer(e)
            | Self::RemoveFinalizer(e)
            | Self::StatusUpdate(e) => Some(e),
            Self::Cleanup(_) => None,
        }
    }

    /// Returns true if the failure was an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }
}

/// A failed reconcile together with the delay before it should be retried.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ReconcileFailure {
    #[source]
    pub error: ReconcileError,
    pub requeue_after: Duration,
}

impl ReconcileFailure {
    pub fn new(error: ReconcileError, requeue_after: Duration) -> Self {
        Self {
            error,
            requeue_after,
        }
    }
}

/// Outcome of one reconcile invocation.
pub type ReconcileResult = Result<Action, ReconcileFailure>;

/// Drives TaskDefine objects toward their declared state.
///
/// Holds no per-object state, so one instance can serve any number of
/// concurrent reconciles for distinct keys.
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    finalizers: FinalizerManager,
    status: StatusSynchronizer,
    requeue: RequeuePolicy,
    metrics: Arc<ControllerMetrics>,
}

impl Reconciler {
    /// Create a new Reconciler.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        cleanup: Arc<dyn CleanupHook>,
        requeue: RequeuePolicy,
    ) -> Self {
        Self::with_metrics(store, cleanup, requeue, ControllerMetrics::new())
    }

    /// Create a new Reconciler reporting into `metrics`.
    pub fn with_metrics(
        store: Arc<dyn ResourceStore>,
        cleanup: Arc<dyn CleanupHook>,
        requeue: RequeuePolicy,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            finalizers: FinalizerManager::new(store.clone(), cleanup, requeue, metrics.clone()),
            status: StatusSynchronizer::new(store.clone(), metrics.clone()),
            store,
            requeue,
            metrics,
        }
    }

    /// The store this reconciler reads and writes.
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Counters this reconciler reports into.
    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Reconcile the object identified by `key`.
    ///
    /// Safe to call repeatedly; a missing object is a no-op.
    pub async fn reconcile(&self, key: &ObjectKey, ctx: &ReconcileContext) -> ReconcileResult {
        info!(namespace = %key.namespace, name = %key.name, "Reconciling TaskDefine");

        let object = match ctx.call(self.store.get(key)).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                self.metrics.record_not_found();
                info!(
                    namespace = %key.namespace,
                    name = %key.name,
                    "TaskDefine resource not found, ignoring since object must be deleted"
                );
                return Ok(Action::done());
            }
            Err(e) => {
                error!(
                    namespace = %key.namespace,
                    name = %key.name,
                    error = %e,
                    "Failed to get TaskDefine"
                );
                return Err(ReconcileFailure::new(
                    ReconcileError::Fetch(e),
                    self.requeue.error,
                ));
            }
        };

        if object.is_being_deleted() {
            return self.finalizers.handle_deletion(&object, ctx).await;
        }

        self.handle_create_or_update(&object, ctx).await
    }

    async fn handle_create_or_update(
        &self,
        object: &TaskDefine,
        ctx: &ReconcileContext,
    ) -> ReconcileResult {
        info!(
            namespace = %object.metadata.namespace,
            name = %object.metadata.name,
            "Handling create/update"
        );

        match self.finalizers.ensure_finalizer(object, ctx).await? {
            EnsureOutcome::Added => return Ok(Action::requeue(self.requeue.finalizer_added)),
            EnsureOutcome::Conflict => return Ok(Action::requeue(self.requeue.conflict)),
            EnsureOutcome::Present => {}
        }

        if let Err(e) = self.status.sync(object, ctx).await {
            error!(
                namespace = %object.metadata.namespace,
                name = %object.metadata.name,
                error = %e,
                "Failed to validate and update status"
            );
            return Err(ReconcileFailure::new(e, self.requeue.error));
        }

        Ok(Action::requeue(self.requeue.resync))
    }
}
