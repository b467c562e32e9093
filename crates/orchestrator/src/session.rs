use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use orchestrator_common::{WorkerFrame, WorkerId};
use tokio::sync::{mpsc, watch};

use crate::AppState;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let shutdown = state.shutdown_rx.clone();
    ws.on_upgrade(move |socket| run_session(socket, state, shutdown))
}

async fn run_session(mut socket: WebSocket, state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel::<orchestrator_common::ServerFrame>();

    let Some(worker_id) = authenticate(&mut socket, &state, conn_tx).await else {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: axum::extract::ws::close_code::POLICY,
                reason: "authentication required".into(),
            })))
            .await;
        return;
    };

    tracing::info!(worker_id = %worker_id, "worker session established");

    loop {
        tokio::select! {
            outbound = conn_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&text, worker_id, &state).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(worker_id = %worker_id, "worker closed session");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(worker_id = %worker_id, error = %e, "session recv error");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    tracing::info!(worker_id = %worker_id, "orchestrator shutting down, sending goodbye");
                    let _ = send_frame(&mut socket, &orchestrator_common::ServerFrame::Goodbye).await;
                    break;
                }
            }
        }
    }

    state.registry.unregister(worker_id).await;
}

/// The first frame on a session must be `auth`; anything else closes the
/// connection immediately (SPEC_FULL.md §4.4).
async fn authenticate(
    socket: &mut WebSocket,
    state: &Arc<AppState>,
    conn_tx: mpsc::UnboundedSender<orchestrator_common::ServerFrame>,
) -> Option<WorkerId> {
    let first = socket.recv().await?;
    let Ok(Message::Text(text)) = first else {
        tracing::warn!("first session frame was not text, closing");
        return None;
    };

    let frame: WorkerFrame = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse first session frame");
            return None;
        }
    };

    let WorkerFrame::Auth {
        api_type,
        token,
        metadata,
    } = frame
    else {
        tracing::warn!("first session frame was not auth, closing");
        return None;
    };

    if !state.registry.authenticate(api_type.as_str(), &token) {
        tracing::warn!(api_type = %api_type, "worker auth rejected");
        let _ = send_frame(
            socket,
            &orchestrator_common::ServerFrame::AuthFailed {
                error: "invalid token".into(),
            },
        )
        .await;
        return None;
    }

    let worker_id = match state.registry.register(api_type.clone(), metadata, conn_tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(error = %e, "failed to register worker");
            return None;
        }
    };

    send_frame(
        socket,
        &orchestrator_common::ServerFrame::AuthSuccess { worker_id },
    )
    .await
    .ok()?;

    tracing::info!(worker_id = %worker_id, api_type = %api_type, "worker authenticated");
    reconcile_in_progress_task(state, worker_id).await;
    Some(worker_id)
}

/// A reconnecting agent advertises the task it was executing across the drop
/// in `metadata.in_progress_task` (SPEC_FULL.md §4.7, §9 "Reconnect identity").
/// The orchestrator reassigns a fresh `worker_id` on every auth, so without
/// this the freshly-registered record would read `idle` and the assignment
/// loop could hand it new work before the queued terminal frame for the old
/// task arrives. If the advertised task is still non-terminal, mark the new
/// worker record `working` on it instead of trusting the default `idle`.
async fn reconcile_in_progress_task(state: &Arc<AppState>, worker_id: WorkerId) {
    let Some(worker) = state.registry.get(worker_id).await else {
        return;
    };
    let Some(task_id) = worker.advertised_in_progress_task() else {
        return;
    };
    match state.queue.get_task(task_id).await {
        Ok(Some(task)) if !task.status.is_terminal() => {
            tracing::info!(worker_id = %worker_id, task_id = %task_id, "worker reconnected with in-progress task");
            state
                .registry
                .set_status(worker_id, orchestrator_common::WorkerStatus::Working, Some(task_id))
                .await;
            if let Err(e) = state.queue.reassign_worker(task_id, worker_id).await {
                tracing::error!(worker_id = %worker_id, task_id = %task_id, error = %e, "failed to reassign task to reconnected worker");
            }
        }
        _ => {}
    }
}

async fn handle_inbound(text: &str, worker_id: WorkerId, state: &Arc<AppState>) {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(worker_id = %worker_id, error = %e, "malformed frame JSON, dropping");
            return;
        }
    };

    let frame: WorkerFrame = match serde_json::from_value(raw.clone()) {
        Ok(frame) => frame,
        Err(_) => {
            let frame_type = raw
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("<missing type>");
            tracing::warn!(worker_id = %worker_id, frame_type, "unrecognized frame type, dropping");
            return;
        }
    };

    match frame {
        WorkerFrame::Auth { .. } => {
            tracing::warn!(worker_id = %worker_id, "unexpected auth frame after session established, dropping");
        }
        WorkerFrame::Heartbeat => {
            state.registry.update_heartbeat(worker_id).await;
            if let (Some(conn), Some(worker)) = (
                state.registry.get_connection(worker_id).await,
                state.registry.get(worker_id).await,
            ) {
                let _ = conn.send(orchestrator_common::ServerFrame::HeartbeatAck {
                    worker_id,
                    status: worker.status,
                    current_task: worker.current_task_id,
                });
            }
        }
        WorkerFrame::Running { task_id } => {
            if let Err(e) = state.queue.mark_running(task_id).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to mark task running");
            }
        }
        WorkerFrame::Status {
            task_id,
            step_key,
            detail_type,
            message,
            data,
        } => match state.queue.get_task(task_id).await {
            Ok(Some(task)) if !task.status.is_terminal() => {
                state
                    .status_relay
                    .relay(task_id, task.report_id, step_key, detail_type, message, data)
                    .await;
            }
            Ok(Some(_)) => {
                tracing::debug!(task_id = %task_id, "dropping status frame for already-terminal task");
            }
            Ok(None) => {
                tracing::warn!(task_id = %task_id, "status frame for unknown task, dropping");
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "failed to look up task for status relay");
            }
        },
        WorkerFrame::Complete { task_id, result } => {
            if let Err(e) = state.queue.mark_completed(task_id, result).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to mark task completed");
            }
        }
        WorkerFrame::Error { task_id, error } => {
            if let Err(e) = state.queue.mark_failed(task_id, &error).await {
                tracing::error!(task_id = %task_id, error = %e, "failed to mark task failed");
            }
        }
        WorkerFrame::Pong => {
            tracing::debug!(worker_id = %worker_id, "pong received");
        }
    }
}

async fn send_frame(
    socket: &mut WebSocket,
    frame: &orchestrator_common::ServerFrame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ServerFrame always serializes");
    socket.send(Message::Text(text.into())).await
}
