//! End-to-end reconcile behavior against the in-memory store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskdefine_controller::{
    CleanupError, CleanupHook, InMemoryStore, NoopCleanup, ReconcileContext, ReconcileError,
    Reconciler, RequeuePolicy, ResourceStore, StoreError,
};
use taskdefine_core::{
    ImageStatus, ObjectKey, RelatedImage, TaskDefine, TaskDefineSpec, TaskDefineState, FINALIZER,
};

/// Wraps the in-memory store, counting writes and injecting failures.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryStore,
    get_failures: Mutex<VecDeque<StoreError>>,
    update_failures: Mutex<VecDeque<StoreError>>,
    status_failures: Mutex<VecDeque<StoreError>>,
    updates: AtomicUsize,
    status_updates: AtomicUsize,
    stall_gets: bool,
}

impl FlakyStore {
    fn fail_next_get(&self, err: StoreError) {
        self.get_failures.lock().unwrap().push_back(err);
    }

    fn fail_next_update(&self, err: StoreError) {
        self.update_failures.lock().unwrap().push_back(err);
    }

    fn fail_next_status_update(&self, err: StoreError) {
        self.status_failures.lock().unwrap().push_back(err);
    }

    fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn status_updates(&self) -> usize {
        self.status_updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for FlakyStore {
    async fn get(&self, key: &ObjectKey) -> Result<TaskDefine, StoreError> {
        if self.stall_gets {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let injected = self.get_failures.lock().unwrap().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.inner.get(key).await
    }

    async fn update(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError> {
        let injected = self.update_failures.lock().unwrap().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update(object).await
    }

    async fn update_status(&self, object: &TaskDefine) -> Result<TaskDefine, StoreError> {
        let injected = self.status_failures.lock().unwrap().pop_front();
        if let Some(err) = injected {
            return Err(err);
        }
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        self.inner.update_status(object).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, StoreError> {
        self.inner.list_keys().await
    }
}

/// Cleanup hook that fails a fixed number of times before succeeding.
struct FailingCleanup {
    remaining_failures: AtomicUsize,
    calls: AtomicUsize,
}

impl FailingCleanup {
    fn new(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CleanupHook for FailingCleanup {
    async fn cleanup(&self, _object: &TaskDefine) -> Result<(), CleanupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CleanupError("external resource still busy".to_string()));
        }
        Ok(())
    }
}

fn spec(idl_type: &str, builder: &str) -> TaskDefineSpec {
    TaskDefineSpec {
        idl_type: idl_type.to_string(),
        idl_name: "orders".to_string(),
        related_image: RelatedImage {
            builder: builder.to_string(),
            ..RelatedImage::default()
        },
        ..TaskDefineSpec::default()
    }
}

fn conflict(key: &ObjectKey) -> StoreError {
    StoreError::Conflict {
        key: key.clone(),
        expected: "1".into(),
        actual: "2".into(),
    }
}

fn reconciler(store: &Arc<FlakyStore>) -> Reconciler {
    Reconciler::new(store.clone(), Arc::new(NoopCleanup), RequeuePolicy::default())
}

async fn create(store: &FlakyStore, object: TaskDefine) -> ObjectKey {
    store.inner.create(object).await.unwrap().key()
}

#[tokio::test]
async fn new_valid_object_gets_finalizer_then_ready() {
    let store = Arc::new(FlakyStore::default());
    let key = create(&store, TaskDefine::new("default", "td", spec("2", "img-builder-1"))).await;
    let reconciler = reconciler(&store);
    let ctx = ReconcileContext::background();

    // First pass: finalizer added, short requeue, status untouched.
    let action = reconciler.reconcile(&key, &ctx).await.unwrap();
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(1)));
    let stored = store.get(&key).await.unwrap();
    assert!(stored.has_finalizer(FINALIZER));
    assert_eq!(stored.status.state, None);
    assert_eq!(store.status_updates(), 0);

    // Second pass: status goes to Ready, periodic resync requested.
    let action = reconciler.reconcile(&key, &ctx).await.unwrap();
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(60)));
    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored.status.state, Some(TaskDefineState::Ready));
    assert_eq!(stored.status.message, "Resource is ready");
    assert!(!stored.status.last_updated.is_empty());
    assert_eq!(store.status_updates(), 1);
}

#[tokio::test]
async fn empty_builder_marks_object_invalid() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("1", "")).with_finalizers([FINALIZER]),
    )
    .await;

    let action = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(60)));

    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored.status.state, Some(TaskDefineState::Invalid));
    assert!(stored
        .status
        .message
        .contains("relatedImage.builder is required"));
}

#[tokio::test]
async fn unknown_idl_type_marks_object_invalid() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("4", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;

    reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();

    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored.status.state, Some(TaskDefineState::Invalid));
    assert!(stored.status.message.contains("invalid IdlType: 4"));
}

#[tokio::test]
async fn repeated_reconciles_do_not_rewrite_status() {
    let store = Arc::new(FlakyStore::default());
    let valid = create(
        &store,
        TaskDefine::new("default", "valid", spec("3", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    let invalid = create(
        &store,
        TaskDefine::new("default", "invalid", spec("", "")).with_finalizers([FINALIZER]),
    )
    .await;
    let reconciler = reconciler(&store);
    let ctx = ReconcileContext::background();

    for key in [&valid, &invalid] {
        reconciler.reconcile(key, &ctx).await.unwrap();
    }
    assert_eq!(store.status_updates(), 2);
    let snapshot = store.get(&invalid).await.unwrap();

    for _ in 0..3 {
        for key in [&valid, &invalid] {
            reconciler.reconcile(key, &ctx).await.unwrap();
        }
    }
    assert_eq!(store.status_updates(), 2);
    assert_eq!(store.updates(), 0);
    assert_eq!(store.get(&invalid).await.unwrap(), snapshot);
}

#[tokio::test]
async fn deletion_with_successful_cleanup_releases_finalizer() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();

    let action = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();
    assert_eq!(action.requeue_after(), None);
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert_eq!(store.status_updates(), 0);
}

#[tokio::test]
async fn deletion_keeps_foreign_finalizers() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1"))
            .with_finalizers(["other.io/guard", FINALIZER]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();

    reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();

    let stored = store.get(&key).await.unwrap();
    assert!(!stored.has_finalizer(FINALIZER));
    assert!(stored.has_finalizer("other.io/guard"));
}

#[tokio::test]
async fn failed_cleanup_keeps_finalizer() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();

    let cleanup = Arc::new(FailingCleanup::new(1));
    let reconciler = Reconciler::new(store.clone(), cleanup.clone(), RequeuePolicy::default());
    let ctx = ReconcileContext::background();

    let failure = reconciler.reconcile(&key, &ctx).await.unwrap_err();
    assert!(matches!(failure.error, ReconcileError::Cleanup(_)));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
    assert!(store.get(&key).await.unwrap().has_finalizer(FINALIZER));
    assert_eq!(store.updates(), 0);

    // Next delivery succeeds and the object goes away.
    reconciler.reconcile(&key, &ctx).await.unwrap();
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert_eq!(cleanup.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn deletion_without_finalizer_is_a_noop() {
    let store = Arc::new(FlakyStore::default());
    // A foreign finalizer keeps the object around after deletion is requested.
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "")).with_finalizers(["other.io/guard"]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();

    let cleanup = Arc::new(FailingCleanup::new(0));
    let reconciler = Reconciler::new(store.clone(), cleanup.clone(), RequeuePolicy::default());
    let action = reconciler
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();

    assert_eq!(action.requeue_after(), None);
    assert_eq!(cleanup.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.updates(), 0);
    // Live-path logic never ran on the deletion-marked object.
    assert_eq!(store.status_updates(), 0);
    assert!(!store.get(&key).await.unwrap().has_finalizer(FINALIZER));
}

#[tokio::test]
async fn conflict_removing_finalizer_requeues_without_error() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();
    store.fail_next_update(conflict(&key));

    let action = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(2)));
    assert!(store.get(&key).await.unwrap().has_finalizer(FINALIZER));
}

#[tokio::test]
async fn store_failure_removing_finalizer_is_an_error() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    store.inner.request_deletion(&key).await.unwrap();
    store.fail_next_update(StoreError::Unavailable("etcd down".to_string()));

    let failure = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ReconcileError::RemoveFinalizer(_)));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
}

#[tokio::test]
async fn conflict_adding_finalizer_requeues_without_error() {
    let store = Arc::new(FlakyStore::default());
    let key = create(&store, TaskDefine::new("default", "td", spec("2", "img-builder-1"))).await;
    store.fail_next_update(conflict(&key));

    let action = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(2)));
    assert!(!store.get(&key).await.unwrap().has_finalizer(FINALIZER));
    assert_eq!(store.status_updates(), 0);
}

#[tokio::test]
async fn store_failure_adding_finalizer_is_an_error() {
    let store = Arc::new(FlakyStore::default());
    let key = create(&store, TaskDefine::new("default", "td", spec("2", "img-builder-1"))).await;
    store.fail_next_update(StoreError::Unavailable("etcd down".to_string()));

    let failure = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ReconcileError::AddFinalizer(_)));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
}

#[tokio::test]
async fn status_conflict_is_surfaced_without_local_mutation() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    let before = store.get(&key).await.unwrap();
    store.fail_next_status_update(conflict(&key));

    let failure = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap_err();
    assert!(failure.error.is_conflict());
    assert!(matches!(failure.error, ReconcileError::StatusUpdate(_)));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
    assert_eq!(store.get(&key).await.unwrap(), before);
}

#[tokio::test]
async fn missing_object_is_a_noop() {
    let store = Arc::new(FlakyStore::default());
    let action = reconciler(&store)
        .reconcile(
            &ObjectKey::new("default", "ghost"),
            &ReconcileContext::background(),
        )
        .await
        .unwrap();
    assert_eq!(action.requeue_after(), None);
}

#[tokio::test]
async fn fetch_failure_requeues_with_error() {
    let store = Arc::new(FlakyStore::default());
    let key = create(&store, TaskDefine::new("default", "td", spec("2", "img-builder-1"))).await;
    store.fail_next_get(StoreError::Unavailable("connection refused".to_string()));

    let failure = reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, ReconcileError::Fetch(_)));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
}

#[tokio::test]
async fn stalled_store_call_times_out_as_retryable_error() {
    let store = Arc::new(FlakyStore {
        stall_gets: true,
        ..FlakyStore::default()
    });
    let ctx = ReconcileContext::new(CancellationToken::new(), Duration::from_millis(20));

    let failure = reconciler(&store)
        .reconcile(&ObjectKey::new("default", "td"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        ReconcileError::Fetch(StoreError::Timeout(_))
    ));
    assert_eq!(failure.requeue_after, Duration::from_secs(5));
}

#[tokio::test]
async fn cancelled_reconcile_aborts_store_call() {
    let store = Arc::new(FlakyStore {
        stall_gets: true,
        ..FlakyStore::default()
    });
    let token = CancellationToken::new();
    let ctx = ReconcileContext::new(token.clone(), Duration::from_secs(60));

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let failure = reconciler(&store)
        .reconcile(&ObjectKey::new("default", "td"), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        failure.error,
        ReconcileError::Fetch(StoreError::Cancelled)
    ));
    canceller.await.unwrap();
}

#[tokio::test]
async fn build_collaborator_fields_survive_status_sync() {
    let store = Arc::new(FlakyStore::default());
    let key = create(
        &store,
        TaskDefine::new("default", "td", spec("2", "img-builder-1")).with_finalizers([FINALIZER]),
    )
    .await;
    let image = ImageStatus {
        repository: "registry.local/team/orders".to_string(),
        tag: "1.4.0".to_string(),
        digest: "sha256:0f3a".to_string(),
        pull_string: "registry.local/team/orders:1.4.0".to_string(),
    };
    store
        .inner
        .record_build(&key, Some(image.clone()), None)
        .await
        .unwrap();

    reconciler(&store)
        .reconcile(&key, &ReconcileContext::background())
        .await
        .unwrap();

    let stored = store.get(&key).await.unwrap();
    assert_eq!(stored.status.state, Some(TaskDefineState::Ready));
    assert_eq!(stored.status.image, Some(image));
}

#[tokio::test]
async fn live_reconcile_always_leaves_finalizer_in_place() {
    let store = Arc::new(FlakyStore::default());
    let reconciler = reconciler(&store);
    let ctx = ReconcileContext::background();

    for (name, s) in [
        ("a", spec("1", "img-builder-1")),
        ("b", spec("", "")),
        ("c", spec("9", "x")),
    ] {
        let key = create(&store, TaskDefine::new("default", name, s)).await;
        for _ in 0..3 {
            reconciler.reconcile(&key, &ctx).await.unwrap();
            assert!(store.get(&key).await.unwrap().has_finalizer(FINALIZER));
        }
    }
}
