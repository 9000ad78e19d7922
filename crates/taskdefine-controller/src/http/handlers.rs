//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use taskdefine_core::ObjectKey;

use crate::http::responses::{ErrorResponse, TaskDefineSummary};
use crate::state::AppState;
use crate::store::ResourceStore;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "objects": state.object_count().await,
    }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = crate::metrics::collect_metrics(&state).await;
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// List TaskDefines with their status.
pub async fn list_taskdefines(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let objects = state.store.list().await;
    let response: Vec<TaskDefineSummary> = objects.iter().map(TaskDefineSummary::from).collect();
    Json(response)
}

/// Fetch one TaskDefine as stored.
pub async fn get_taskdefine(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = ObjectKey::new(namespace, name);
    match state.store.get(&key).await {
        Ok(object) => (StatusCode::OK, Json(object)).into_response(),
        Err(e) if e.is_not_found() => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ControllerMetrics;
    use crate::store::InMemoryStore;
    use axum::body::to_bytes;
    use taskdefine_core::{TaskDefine, TaskDefineSpec};

    async fn state_with(names: &[&str]) -> Arc<AppState> {
        let store = Arc::new(InMemoryStore::new());
        for name in names {
            store
                .create(TaskDefine::new("default", *name, TaskDefineSpec::default()))
                .await
                .unwrap();
        }
        AppState::new(store, ControllerMetrics::new())
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_list_taskdefines() {
        let state = state_with(&["b", "a"]).await;
        let response = list_taskdefines(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "a");
        assert_eq!(rows[1]["name"], "b");
        assert_eq!(rows[0]["deleting"], false);
    }

    #[tokio::test]
    async fn test_get_taskdefine() {
        let state = state_with(&["orders"]).await;
        let response = get_taskdefine(
            State(state),
            Path(("default".to_string(), "orders".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["metadata"]["name"], "orders");
        assert_eq!(body["metadata"]["namespace"], "default");
    }

    #[tokio::test]
    async fn test_get_missing_taskdefine_is_404() {
        let state = state_with(&[]).await;
        let response = get_taskdefine(
            State(state),
            Path(("default".to_string(), "missing".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("default/missing"));
    }

    #[tokio::test]
    async fn test_health_reports_object_count() {
        let state = state_with(&["a", "b", "c"]).await;
        let body = body_json(health_check(State(state)).await.into_response()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["objects"], 3);
    }
}
