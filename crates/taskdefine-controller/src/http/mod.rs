//! HTTP server for the controller.
//!
//! Provides endpoints for:
//! - TaskDefine inspection (`/v1/taskdefines`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/v1/taskdefines", get(handlers::list_taskdefines))
        .route(
            "/v1/taskdefines/:namespace/:name",
            get(handlers::get_taskdefine),
        )
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
