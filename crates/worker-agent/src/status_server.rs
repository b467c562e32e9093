use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use orchestrator_common::TaskId;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AgentState;

#[derive(Clone)]
struct StatusServerState {
    agent_state: Arc<AgentState>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
}

/// A status update relayed from the local scraper process to the agent's
/// main loop, which performs the fire-and-forget emission over the session.
pub struct StatusUpdate {
    pub task_id: TaskId,
    pub step_key: String,
    pub detail_type: String,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Deserialize)]
struct StatusBody {
    task_id: TaskId,
    #[serde(default = "default_step_key")]
    step_key: String,
    #[serde(default = "default_detail_type")]
    detail_type: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn default_step_key() -> String {
    "unknown".into()
}

fn default_detail_type() -> String {
    "status".into()
}

/// Minimal local receiver bound to a loopback port: the scraper process the
/// agent wraps posts progress here, the agent decides what to do with it
/// (SPEC_FULL.md §4.7, "side-channel status receiver").
pub fn router(agent_state: Arc<AgentState>, status_tx: mpsc::UnboundedSender<StatusUpdate>) -> Router {
    let state = StatusServerState { agent_state, status_tx };
    Router::new()
        .route("/status", post(handle_status))
        .with_state(state)
}

async fn handle_status(
    State(state): State<StatusServerState>,
    Json(body): Json<StatusBody>,
) -> StatusCode {
    let current = state.agent_state.current_task_id().await;
    if current != Some(body.task_id) {
        tracing::warn!(task_id = %body.task_id, "status update for task not currently running, dropping");
        return StatusCode::OK;
    }

    let _ = state.status_tx.send(StatusUpdate {
        task_id: body.task_id,
        step_key: body.step_key,
        detail_type: body.detail_type,
        message: body.message,
        data: body.data,
    });
    StatusCode::OK
}
