use std::sync::Arc;

use orchestrator_common::ApiType;
use tokio::sync::watch;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;

const API_TYPES: &[&str] = &["crunchbase", "tracxn", "social"];
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Drains the per-`api_type` queues against idle workers whenever either side
/// changes, falling back to a 5s poll so a missed signal never wedges the fleet.
pub async fn run_assignment_loop(
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("assignment loop started");
    loop {
        tokio::select! {
            _ = queue.wait_for_signal_or_timeout(POLL_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        if let Some(name) = circuit_breakers.any_hard_open() {
            tracing::warn!(circuit = name, "hard dependency circuit open, pausing assignment");
            continue;
        }

        for api_type_str in API_TYPES {
            let api_type = ApiType::new(*api_type_str);
            loop {
                match queue.assign_next(&api_type).await {
                    Ok(Some((task, worker_id))) => {
                        dispatch(&queue, &registry, task, worker_id).await;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(api_type = %api_type, error = %e, "assignment attempt failed");
                        break;
                    }
                }
            }
        }
    }
    tracing::info!("assignment loop shutting down");
}

async fn dispatch(
    queue: &Arc<TaskQueue>,
    registry: &Arc<WorkerRegistry>,
    task: orchestrator_common::Task,
    worker_id: orchestrator_common::WorkerId,
) {
    let Some(connection) = registry.get_connection(worker_id).await else {
        tracing::warn!(worker_id = %worker_id, task_id = %task.task_id, "assigned worker has no live connection");
        if let Err(e) = queue
            .mark_failed(task.task_id, "worker disconnected before dispatch")
            .await
        {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to requeue after dispatch miss");
        }
        return;
    };

    let frame = orchestrator_common::ServerFrame::Task {
        task_id: task.task_id,
        report_id: task.report_id.clone(),
        action: task.action.clone(),
        payload: task.payload.clone(),
    };

    if connection.send(frame).is_err() {
        tracing::warn!(worker_id = %worker_id, task_id = %task.task_id, "failed to send task frame, worker channel closed");
        if let Err(e) = queue
            .mark_failed(task.task_id, "failed to deliver task frame")
            .await
        {
            tracing::error!(task_id = %task.task_id, error = %e, "failed to requeue after send failure");
        }
    }
}
