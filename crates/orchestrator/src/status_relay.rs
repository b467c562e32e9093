use std::sync::Arc;
use std::time::Duration;

use orchestrator_common::TaskId;
use serde::Serialize;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::OrchestratorConfig;

const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct StatusUpdatePayload {
    task_id: TaskId,
    report_id: String,
    step_key: String,
    detail_type: String,
    message: String,
    data: serde_json::Value,
}

/// Forwards worker `status` frames to the control plane. Fire-and-forget: a
/// failed relay is logged and dropped, never retried (SPEC_FULL.md §4.6 —
/// progress updates are idempotent-in-spirit and staleness is acceptable).
pub struct StatusRelay {
    http: reqwest::Client,
    backend_status_url: String,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
}

impl StatusRelay {
    pub fn new(config: &OrchestratorConfig, circuit_breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            backend_status_url: config.backend_status_url.clone(),
            circuit_breakers,
        }
    }

    pub async fn relay(
        &self,
        task_id: TaskId,
        report_id: String,
        step_key: String,
        detail_type: String,
        message: String,
        data: serde_json::Value,
    ) {
        if !self.circuit_breakers.control_plane.allow() {
            tracing::debug!(task_id = %task_id, "status relay circuit open, dropping update");
            return;
        }

        let payload = StatusUpdatePayload {
            task_id,
            report_id,
            step_key,
            detail_type,
            message,
            data,
        };

        let result = tokio::time::timeout(
            RELAY_TIMEOUT,
            self.http.post(&self.backend_status_url).json(&payload).send(),
        )
        .await;

        match result {
            Ok(Ok(response)) if response.status().is_success() => {
                self.circuit_breakers.control_plane.record_success();
            }
            Ok(Ok(response)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(task_id = %task_id, status = %response.status(), "status relay returned non-success");
            }
            Ok(Err(e)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(task_id = %task_id, error = %e, "status relay request failed");
            }
            Err(_) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(task_id = %task_id, "status relay timed out");
            }
        }
    }
}
