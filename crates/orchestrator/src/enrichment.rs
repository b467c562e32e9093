use std::sync::Arc;

use orchestrator_common::{ApiType, EnrichmentResult, Task, TaskSource, TaskSubmission};
use tokio::sync::{mpsc, watch};

use crate::control_plane::ControlPlane;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;

const CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const ENRICHMENT_PRIORITY: i64 = -10;
const DAYS_THRESHOLD: u64 = 180;

/// Fills idle Crunchbase worker time with background keyword scraping drawn
/// from the control plane's backlog (SPEC_FULL.md §4.5).
pub async fn run_enrichment_loop(
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    control_plane: Arc<ControlPlane>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("enrichment loop started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }

        if should_enrich(&queue, &registry, &control_plane).await {
            dispatch_next_enrichment(&queue, &control_plane).await;
        }
    }
    tracing::info!("enrichment loop shutting down");
}

async fn should_enrich(
    queue: &Arc<TaskQueue>,
    registry: &Arc<WorkerRegistry>,
    control_plane: &Arc<ControlPlane>,
) -> bool {
    let crunchbase = ApiType::crunchbase();

    let stats = match queue.queue_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read queue stats for enrichment check");
            return false;
        }
    };
    if stats.get(crunchbase.as_str()).map(|s| s.pending).unwrap_or(0) > 0 {
        tracing::debug!("skipping enrichment: backend tasks pending");
        return false;
    }

    if registry.get_idle(&crunchbase).await.is_empty() {
        tracing::debug!("skipping enrichment: no idle crunchbase workers");
        return false;
    }

    match control_plane.enrichment_status().await {
        Some(status) if status.is_paused => {
            tracing::debug!("skipping enrichment: paused by control plane");
            false
        }
        Some(status) if status.pending_count == 0 => {
            tracing::debug!("skipping enrichment: no pending keywords");
            false
        }
        Some(_) => true,
        None => {
            tracing::debug!("skipping enrichment: status check unavailable");
            false
        }
    }
}

async fn dispatch_next_enrichment(queue: &Arc<TaskQueue>, control_plane: &Arc<ControlPlane>) {
    let Some(keyword) = control_plane.next_keyword().await else {
        return;
    };

    control_plane
        .enrichment_callback(serde_json::json!({
            "keyword_id": keyword.id,
            "action": "start",
        }))
        .await;

    let num_companies = keyword.num_companies.unwrap_or(50);
    let submission = TaskSubmission {
        api_type: ApiType::crunchbase(),
        action: "enrich".into(),
        report_id: format!("enrichment-{}", keyword.id),
        payload: serde_json::json!({
            "keywords": [keyword.keyword.clone()],
            "num_companies": num_companies,
            "days_threshold": DAYS_THRESHOLD,
            "enrichment_keyword_id": keyword.id,
        }),
        priority: Some(ENRICHMENT_PRIORITY),
        target_worker_id: None,
        source: Some(TaskSource::Enrichment),
    };

    match queue.enqueue(submission).await {
        Ok(task) => {
            tracing::info!(task_id = %task.task_id, keyword = %keyword.keyword, "enrichment task queued");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to enqueue enrichment task");
        }
    }
}

/// Extracts `{companies_found, companies_scraped}` from a batch-endpoint
/// response and relays completion/failure to the control plane. Wired from
/// the queue's terminal-task channel by the caller in `main.rs`.
pub async fn run_completion_wiring(
    mut terminal_rx: mpsc::UnboundedReceiver<Task>,
    control_plane: Arc<ControlPlane>,
) {
    while let Some(task) = terminal_rx.recv().await {
        if task.source != TaskSource::Enrichment {
            continue;
        }
        let Some(keyword_id) = task
            .payload
            .get("enrichment_keyword_id")
            .or_else(|| task.result.as_ref().and_then(|r| r.get("enrichment_keyword_id")))
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_u64().map(|n| n.to_string())))
        else {
            continue;
        };

        if let Some(result) = &task.result {
            let summary = result.get("summary").cloned().unwrap_or_default();
            let companies_found = summary.get("total_companies_found").and_then(|v| v.as_u64());
            let companies_scraped = result.get("results").and_then(|v| v.as_array()).map(|results| {
                results
                    .iter()
                    .filter(|r| r.get("status").and_then(|s| s.as_str()) == Some("success"))
                    .filter_map(|r| r.get("count").and_then(|c| c.as_u64()))
                    .sum::<u64>()
            });

            let enrichment_result = EnrichmentResult {
                keyword_id: keyword_id.clone(),
                companies_found,
                companies_scraped,
            };
            let mut payload = serde_json::to_value(&enrichment_result)
                .expect("EnrichmentResult always serializes");
            payload["action"] = serde_json::json!("complete");
            payload["task_id"] = serde_json::json!(task.task_id);

            control_plane.enrichment_callback(payload).await;
        } else if let Some(error) = &task.error {
            control_plane
                .enrichment_callback(serde_json::json!({
                    "keyword_id": keyword_id,
                    "action": "error",
                    "task_id": task.task_id,
                    "error_message": error,
                }))
                .await;
        }
    }
}
