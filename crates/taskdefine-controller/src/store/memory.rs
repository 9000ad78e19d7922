//! In-memory resource store.
//!
//! Behaves like the control plane's object store as far as the reconciler can
//! observe: resource versions change on every write, stale writes conflict,
//! and an object marked for deletion is physically removed once its last
//! finalizer is gone.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use taskdefine_core::{
    BuildStatus, ImageStatus, ObjectKey, ObjectUid, ResourceVersion, TaskDefine, TaskDefineSpec,
};

use super::{ResourceStore, StoreError};

/// Capacity of the change-notification channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    objects: HashMap<ObjectKey, TaskDefine>,
    revision: u64,
}

impl Inner {
    fn next_version(&mut self) -> ResourceVersion {
        self.revision += 1;
        ResourceVersion::from(self.revision)
    }

    /// Look up `object` and check its resource version against the stored one.
    fn checked_mut(&mut self, object: &TaskDefine) -> Result<&mut TaskDefine, StoreError> {
        let key = object.key();
        let stored = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if stored.metadata.resource_version != object.metadata.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: object.metadata.resource_version.clone(),
                actual: stored.metadata.resource_version.clone(),
            });
        }
        Ok(stored)
    }
}

/// In-memory [`ResourceStore`] with change notifications.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    events: broadcast::Sender<ObjectKey>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                objects: HashMap::new(),
                revision: 0,
            }),
            events,
        }
    }

    /// Subscribe to change notifications. Every write emits the key it touched.
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectKey> {
        self.events.subscribe()
    }

    fn notify(&self, key: ObjectKey) {
        // No subscribers is fine.
        let _ = self.events.send(key);
    }

    /// Create a new object. Store-managed metadata in `object` is overwritten.
    pub async fn create(&self, mut object: TaskDefine) -> Result<TaskDefine, StoreError> {
        let key = object.key();
        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        object.metadata.uid = Some(ObjectUid::generate());
        object.metadata.creation_timestamp = Some(Utc::now());
        object.metadata.deletion_timestamp = None;
        object.metadata.resource_version = inner.next_version();
        inner.objects.insert(key.clone(), object.clone());
        drop(inner);

        debug!(key = %key, "TaskDefine created");
        self.notify(key);
        Ok(object)
    }

    /// All objects, ordered by key.
    pub async fn list(&self) -> Vec<TaskDefine> {
        let inner = self.inner.read().await;
        let mut objects: Vec<TaskDefine> = inner.objects.values().cloned().collect();
        objects.sort_by(|a, b| a.key().cmp(&b.key()));
        objects
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.inner.read().await.objects.len()
    }

    /// Returns true if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Replace the spec of an object, as its author would.
    pub async fn update_spec(
        &self,
        key: &ObjectKey,
        spec: TaskDefineSpec,
    ) -> Result<TaskDefine, StoreError> {
        let mut inner = self.inner.write().await;
        let version = inner.next_version();
        let stored = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        stored.spec = spec;
        stored.metadata.resource_version = version;
        let updated = stored.clone();
        drop(inner);

        self.notify(key.clone());
        Ok(updated)
    }

    /// Request deletion.
    ///
    /// Objects without finalizers are removed immediately and `None` is
    /// returned; otherwise the deletion marker is set and the marked object
    /// is returned.
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<Option<TaskDefine>, StoreError> {
        let mut inner = self.inner.write().await;
        let finalizers_empty = inner
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?
            .metadata
            .finalizers
            .is_empty();

        let result = if finalizers_empty {
            inner.objects.remove(key);
            debug!(key = %key, "TaskDefine removed");
            None
        } else {
            let version = inner.next_version();
            let stored = inner
                .objects
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = Some(Utc::now());
                stored.metadata.resource_version = version;
            }
            Some(stored.clone())
        };
        drop(inner);

        self.notify(key.clone());
        Ok(result)
    }

    /// Record the outcome of an image build, as the build collaborator would.
    ///
    /// Only `status.image`, `status.build` and `status.lastUpdateTime` change.
    pub async fn record_build(
        &self,
        key: &ObjectKey,
        image: Option<ImageStatus>,
        build: Option<BuildStatus>,
    ) -> Result<TaskDefine, StoreError> {
        let mut inner = self.inner.write().await;
        let version = inner.next_version();
        let stored = inner
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        stored.status.image = image;
        stored.status.build = build;
        stored.status.last_update_time = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        stored.metadata.resource_version = version;
        let updated = stored.clone();
        drop(inner);

        self.notify(key.clone());
        Ok(updated)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<TaskDefine, StoreError> {
        self.inner
            .read()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn update(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError> {
        let key = object.key();
        let mut inner = self.inner.write().await;
        inner.checked_mut(object)?;
        let version = inner.next_version();

        let stored = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        stored.metadata.finalizers = object.metadata.finalizers.clone();
        stored.spec = object.spec.clone();
        stored.metadata.resource_version = version;
        let updated = stored.clone();

        if updated.is_being_deleted() && updated.metadata.finalizers.is_empty() {
            inner.objects.remove(&key);
            debug!(key = %key, "Last finalizer removed, TaskDefine removed");
        }
        drop(inner);

        self.notify(key);
        Ok(updated)
    }

    async fn update_status(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError> {
        let key = object.key();
        let mut inner = self.inner.write().await;
        inner.checked_mut(object)?;
        let version = inner.next_version();

        let stored = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        stored.status = object.status.clone();
        stored.metadata.resource_version = version;
        let updated = stored.clone();
        drop(inner);

        self.notify(key);
        Ok(updated)
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        let inner = self.inner.read().await;
        let mut keys: Vec<ObjectKey> = inner.objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
