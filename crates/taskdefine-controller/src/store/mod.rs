//! Resource store capability.
//!
//! The reconciler only ever talks to the store through [`ResourceStore`], so
//! tests and alternative backends can hand it their own implementation.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use taskdefine_core::{ObjectKey, ResourceVersion, TaskDefine};

mod memory;

pub use memory::InMemoryStore;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The object does not exist (or has already been removed).
    #[error("TaskDefine not found: {0}")]
    NotFound(ObjectKey),

    /// The write carried a stale resource version.
    #[error("Resource version conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: ResourceVersion,
        actual: ResourceVersion,
    },

    /// Object already exists on create.
    #[error("TaskDefine already exists: {0}")]
    AlreadyExists(ObjectKey),

    /// The store could not be reached or failed internally.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish before its deadline.
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was aborted because the reconcile was cancelled.
    #[error("Store call cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns true for a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Access to persisted TaskDefine objects.
///
/// Writes are guarded by `metadata.resource_version`: a write whose version
/// does not match the stored one fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch the current object.
    async fn get(&self, key: &ObjectKey) -> Result<TaskDefine, StoreError>;

    /// Persist metadata and spec. Status in `object` is ignored.
    async fn update(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError>;

    /// Persist the status subresource. Metadata and spec in `object` are ignored.
    async fn update_status(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError>;

    /// Keys of every stored object, including deletion-marked ones.
    async fn list_keys(&self) -> Result<Vec<ObjectKey>, StoreError>;
}
