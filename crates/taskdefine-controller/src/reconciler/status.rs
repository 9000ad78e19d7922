//! Status synchronization: derive the next status from the validation
//! outcome and write it only when it changed.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info};

use taskdefine_core::{
    validate_spec, TaskDefine, TaskDefineState, TaskDefineStatus, ValidatedSpec, ValidationError,
};

use super::ReconcileError;
use crate::context::ReconcileContext;
use crate::metrics::ControllerMetrics;
use crate::store::ResourceStore;

/// Message recorded when status is first initialized.
pub const INITIALIZING_MESSAGE: &str = "Initializing";

/// Message recorded when the spec validates.
pub const READY_MESSAGE: &str = "Resource is ready";

/// Message recorded for a spec that failed validation.
pub fn invalid_message(err: &ValidationError) -> String {
    format!("Validation failed: {err}")
}

/// Compute the status that should be persisted, or `None` if the current
/// one already reflects `validation`.
///
/// `image`, `build` and `lastUpdateTime` are carried over untouched.
pub fn next_status(
    current: &TaskDefineStatus,
    validation: &Result<ValidatedSpec, ValidationError>,
    now: DateTime<Utc>,
) -> Option<TaskDefineStatus> {
    let mut next = current.clone();
    let mut changed = false;

    if next.state.is_none() {
        next.state = Some(TaskDefineState::Pending);
        next.message = INITIALIZING_MESSAGE.to_string();
        changed = true;
    }

    match validation {
        Err(err) => {
            let message = invalid_message(err);
            if next.state != Some(TaskDefineState::Invalid) || next.message != message {
                next.state = Some(TaskDefineState::Invalid);
                next.message = message;
                changed = true;
            }
        }
        Ok(_) => {
            if next.state != Some(TaskDefineState::Ready) {
                next.state = Some(TaskDefineState::Ready);
                next.message = READY_MESSAGE.to_string();
                changed = true;
            }
        }
    }

    if !changed {
        return None;
    }
    next.last_updated = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    Some(next)
}

/// Validates a TaskDefine and persists its status subresource on change.
pub struct StatusSynchronizer {
    store: Arc<dyn ResourceStore>,
    metrics: Arc<ControllerMetrics>,
}

impl StatusSynchronizer {
    /// Create a new StatusSynchronizer.
    pub fn new(store: Arc<dyn ResourceStore>, metrics: Arc<ControllerMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Validate `object` and write its next status if it differs.
    ///
    /// Returns the stored object after a write, `None` when nothing changed.
    /// Conflicts are returned as errors: the next attempt must start from a
    /// fresh read.
    pub async fn sync(
        &self,
        object: &TaskDefine,
        ctx: &ReconcileContext,
    ) -> Result<Option<TaskDefine>, ReconcileError> {
        let validation = validate_spec(&object.spec);
        let Some(status) = next_status(&object.status, &validation, Utc::now()) else {
            return Ok(None);
        };

        let mut next = object.clone();
        next.status = status;

        match ctx.call(self.store.update_status(&next)).await {
            Ok(stored) => {
                self.metrics.record_status_write();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    state = ?next.status.state,
                    message = %next.status.message,
                    "Successfully updated status"
                );
                Ok(Some(stored))
            }
            Err(e) if e.is_conflict() => {
                self.metrics.record_conflict();
                info!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    "Resource version conflict when updating status, will retry"
                );
                Err(ReconcileError::StatusUpdate(e))
            }
            Err(e) => {
                error!(
                    namespace = %object.metadata.namespace,
                    name = %object.metadata.name,
                    error = %e,
                    "Failed to update status"
                );
                Err(ReconcileError::StatusUpdate(e))
            }
        }
    }
}
