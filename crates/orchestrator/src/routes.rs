use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use orchestrator_common::{ApiType, TaskId, TaskSubmission};
use serde::Deserialize;

use crate::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics_handle.render()
}

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<TaskSubmission>,
) -> impl IntoResponse {
    match state.queue.enqueue(submission).await {
        Ok(task) => (StatusCode::OK, Json(serde_json::json!({"task_id": task.task_id}))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "task submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> impl IntoResponse {
    match state.queue.get_task(task_id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "task not found"})),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "task lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<TaskId>,
) -> impl IntoResponse {
    match state.queue.cancel(task_id).await {
        Ok(cancelled) => {
            if cancelled {
                if let Ok(Some(task)) = state.queue.get_task(task_id).await {
                    if let Some(worker_id) = task.assigned_worker_id {
                        if let Some(conn) = state.registry.get_connection(worker_id).await {
                            let _ = conn.send(orchestrator_common::ServerFrame::Cancel { task_id });
                        }
                    }
                }
            }
            (StatusCode::OK, Json(serde_json::json!({"cancelled": cancelled}))).into_response()
        }
        Err(e) => {
            tracing::error!(task_id = %task_id, error = %e, "task cancellation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ApiTypeQuery {
    api_type: String,
}

pub async fn cancel_pending(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ApiTypeQuery>,
) -> impl IntoResponse {
    let api_type = ApiType::new(query.api_type);
    match state.queue.cancel_pending(&api_type).await {
        Ok(count) => {
            (StatusCode::OK, Json(serde_json::json!({"cancelled_count": count}))).into_response()
        }
        Err(e) => {
            tracing::error!(api_type = %api_type, error = %e, "bulk cancellation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

pub async fn list_workers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.get_all().await)
}

pub async fn worker_stats(
    State(state): State<Arc<AppState>>,
    Path(api_type): Path<String>,
) -> impl IntoResponse {
    let stats = state.registry.stats(Some(&ApiType::new(api_type))).await;
    Json(stats)
}

pub async fn queue_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.queue.queue_stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "queue stats unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
