//! TaskDefine Controller Library
//!
//! This crate provides the reconciliation machinery for TaskDefine
//! resources: the reconciler itself, the store capability it talks to, and
//! the control loop, metrics and HTTP surface around it.

pub mod config;
pub mod context;
pub mod controller;
pub mod http;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod state;
pub mod store;

pub use config::{ControllerConfig, RequeuePolicy};
pub use context::ReconcileContext;
pub use controller::Controller;
pub use metrics::ControllerMetrics;
pub use queue::WorkQueue;
pub use reconciler::{
    Action, CleanupError, CleanupHook, NoopCleanup, ReconcileError, ReconcileFailure,
    ReconcileResult, Reconciler,
};
pub use state::AppState;
pub use store::{InMemoryStore, ResourceStore, StoreError};
