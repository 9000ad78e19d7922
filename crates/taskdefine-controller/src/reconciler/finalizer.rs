//! Finalizer lifecycle: adding the deletion guard to live objects and
//! releasing it once cleanup has succeeded.

use std::sync::Arc;

use tracing::{error, info};

use taskdefine_core::{TaskDefine, FINALIZER};

use super::cleanup::CleanupHook;
use super::{Action, ReconcileError, ReconcileFailure, ReconcileResult};
use crate::config::RequeuePolicy;
use crate::context::ReconcileContext;
use crate::metrics::ControllerMetrics;
use crate::store::ResourceStore;

/// Result of [`FinalizerManager::ensure_finalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The guard was already there; the live path may proceed.
    Present,
    /// The guard was just persisted; requeue before doing anything else.
    Added,
    /// Persisting lost a race; requeue and try again from a fresh read.
    Conflict,
}

/// The write needed to put the guard on `object`, or `None` if it is present.
pub fn plan_add_finalizer(object: &TaskDefine) -> Option<TaskDefine> {
    let mut next = object.clone();
    next.add_finalizer(FINALIZER).then_some(next)
}

/// The write needed to take the guard off `object`, or `None` if it is absent.
pub fn plan_remove_finalizer(object: &TaskDefine) -> Option<TaskDefine> {
    let mut next = object.clone();
    next.remove_finalizer(FINALIZER).then_some(next)
}

/// Manages presence of [`FINALIZER`] on TaskDefine objects.
pub struct FinalizerManager {
    store: Arc<dyn ResourceStore>,
    cleanup: Arc<dyn CleanupHook>,
    requeue: RequeuePolicy,
    metrics: Arc<ControllerMetrics>,
}

impl FinalizerManager {
    /// Create a new FinalizerManager.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        cleanup: Arc<dyn CleanupHook>,
        requeue: RequeuePolicy,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            store,
            cleanup,
            requeue,
            metrics,
        }
    }

    /// Make sure a live object carries the guard.
    pub async fn ensure_finalizer(
        &self,
        object: &TaskDefine,
        ctx: &ReconcileContext,
    ) -> Result<EnsureOutcome, ReconcileFailure> {
        let Some(next) = plan_add_finalizer(object) else {
            return Ok(EnsureOutcome::Present);
        };

        match ctx.call(self.store.update(&next)).await {
            Ok(_) => {
                self.metrics.record_finalizer_added();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    "Successfully added finalizer"
                );
                Ok(EnsureOutcome::Added)
            }
            Err(e) if e.is_conflict() => {
                self.metrics.record_conflict();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    "Resource version conflict when adding finalizer, will retry"
                );
                Ok(EnsureOutcome::Conflict)
            }
            Err(e) => {
                error!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    error = %e,
                    "Failed to add finalizer"
                );
                Err(ReconcileFailure::new(
                    ReconcileError::AddFinalizer(e),
                    self.requeue.error,
                ))
            }
        }
    }

    /// Run cleanup for a deletion-marked object, then release the guard.
    ///
    /// The guard is only removed when cleanup succeeded in this same call.
    pub async fn handle_deletion(
        &self,
        object: &TaskDefine,
        ctx: &ReconcileContext,
    ) -> ReconcileResult {
        info!(
            namespace = %object.metadata.namespace,
            name = %object.metadata.name,
            "Handling deletion"
        );

        let Some(next) = plan_remove_finalizer(object) else {
            return Ok(Action::done());
        };

        if let Err(e) = self.cleanup.cleanup(object).await {
            error!(
                namespace = %object.metadata.namespace,
                name = %object.metadata.name,
                error = %e,
                "Failed to cleanup resources"
            );
            return Err(ReconcileFailure::new(
                ReconcileError::Cleanup(e),
                self.requeue.error,
            ));
        }

        match ctx.call(self.store.update(&next)).await {
            Ok(_) => {
                self.metrics.record_finalizer_removed();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    "Successfully removed finalizer"
                );
                Ok(Action::done())
            }
            Err(e) if e.is_conflict() => {
                self.metrics.record_conflict();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    "Resource version conflict when removing finalizer, will retry"
                );
                Ok(Action::requeue(self.requeue.conflict))
            }
            Err(e) => {
                error!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    error = %e,
                    "Failed to remove finalizer"
                );
                Err(ReconcileFailure::new(
                    ReconcileError::RemoveFinalizer(e),
                    self.requeue.error,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdefine_core::TaskDefineSpec;

    #[test]
    fn test_plan_add_only_when_absent() {
        let bare = TaskDefine::new("default", "td", TaskDefineSpec::default());
        let planned = plan_add_finalizer(&bare).unwrap();
        assert!(planned.has_finalizer(FINALIZER));
        assert!(!bare.has_finalizer(FINALIZER));

        assert!(plan_add_finalizer(&planned).is_none());
    }

    #[test]
    fn test_plan_remove_only_when_present() {
        let guarded = TaskDefine::new("default", "td", TaskDefineSpec::default())
            .with_finalizers(["other/guard", FINALIZER]);
        let planned = plan_remove_finalizer(&guarded).unwrap();
        assert_eq!(planned.metadata.finalizers, vec!["other/guard".to_string()]);

        assert!(plan_remove_finalizer(&planned).is_none());
    }
}
