//! Control loop: turns change notifications and requeue requests into
//! reconcile calls.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use taskdefine_core::ObjectKey;

use crate::config::ControllerConfig;
use crate::context::ReconcileContext;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::store::ResourceStore;

/// Runs a [`Reconciler`] over a [`WorkQueue`] with a pool of workers.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    queue: Arc<WorkQueue>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a new Controller.
    pub fn new(reconciler: Arc<Reconciler>, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            config,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// `initial` keys are reconciled first; afterwards every key received on
    /// `notifications` is enqueued. If the receiver falls behind, the store is
    /// relisted so no key is lost.
    pub async fn run(
        self,
        mut notifications: broadcast::Receiver<ObjectKey>,
        initial: Vec<ObjectKey>,
        shutdown: CancellationToken,
    ) {
        let tracker = TaskTracker::new();

        for key in initial {
            self.queue.add(key).await;
        }

        {
            let queue = self.queue.clone();
            let store = self.reconciler.store().clone();
            let shutdown = shutdown.clone();
            tracker.spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = notifications.recv() => match event {
                            Ok(key) => queue.add(key).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Change notifications dropped, relisting");
                                relist(store.as_ref(), &queue).await;
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
                debug!("Notification watcher stopped");
            });
        }

        {
            let queue = self.queue.clone();
            tracker.spawn(async move {
                queue.run_timers().await;
                debug!("Requeue timers stopped");
            });
        }

        info!(workers = self.config.workers, "Starting TaskDefine controller");

        for worker in 0..self.config.workers {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let shutdown = shutdown.clone();
            let call_timeout = self.config.store_timeout;
            tracker.spawn(async move {
                while let Some(key) = queue.next().await {
                    let ctx = ReconcileContext::new(shutdown.child_token(), call_timeout);
                    let requeue_after = match reconciler.reconcile(&key, &ctx).await {
                        Ok(action) => {
                            reconciler.metrics().record_success();
                            action.requeue_after()
                        }
                        Err(failure) => {
                            reconciler.metrics().record_error();
                            warn!(
                                key = %key,
                                error = %failure,
                                requeue_after = ?failure.requeue_after,
                                "Reconcile failed"
                            );
                            Some(failure.requeue_after)
                        }
                    };

                    if let Some(after) = requeue_after {
                        debug!(key = %key, requeue_after = ?after, "Requeue scheduled");
                        queue.add_after(key.clone(), after).await;
                    }
                    queue.done(&key).await;
                }
                debug!(worker, "Worker stopped");
            });
        }

        shutdown.cancelled().await;
        let pending = self.queue.len().await;
        let scheduled = self.queue.delayed_len().await;
        info!(pending, scheduled, "Shutting down TaskDefine controller");
        self.queue.shutdown().await;
        tracker.close();
        tracker.wait().await;
    }
}

async fn relist(store: &dyn ResourceStore, queue: &WorkQueue) {
    match store.list_keys().await {
        Ok(keys) => {
            debug!(count = keys.len(), "Relisted TaskDefines");
            for key in keys {
                queue.add(key).await;
            }
        }
        Err(e) => warn!(error = %e, "Relist failed"),
    }
}
