//! Shared application state for the HTTP surface.

use std::sync::Arc;

use crate::metrics::ControllerMetrics;
use crate::store::InMemoryStore;

/// Shared application state.
pub struct AppState {
    /// Object store the controller reconciles against.
    pub store: Arc<InMemoryStore>,

    /// Reconcile counters.
    pub metrics: Arc<ControllerMetrics>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(store: Arc<InMemoryStore>, metrics: Arc<ControllerMetrics>) -> Arc<Self> {
        Arc::new(Self { store, metrics })
    }

    /// Get the number of stored TaskDefine objects.
    pub async fn object_count(&self) -> usize {
        self.store.len().await
    }
}
