use std::sync::Arc;
use std::time::Duration;

use orchestrator_common::EnrichmentKeyword;
use serde::Deserialize;

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::config::OrchestratorConfig;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);
const KEYWORDS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
pub struct EnrichmentStatus {
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub pending_count: u64,
}

/// HTTP client for the enrichment-coordination calls the control plane exposes
/// (`GET .../status/`, `GET .../keywords/`, `POST .../callback/`), guarded by
/// the `control_plane` circuit breaker — a soft dependency (SPEC_FULL.md §7).
pub struct ControlPlane {
    http: reqwest::Client,
    backend_url: String,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
}

impl ControlPlane {
    pub fn new(config: &OrchestratorConfig, circuit_breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            backend_url: config.backend_url.clone(),
            circuit_breakers,
        }
    }

    pub async fn enrichment_status(&self) -> Option<EnrichmentStatus> {
        if !self.circuit_breakers.control_plane.allow() {
            return None;
        }
        let url = format!("{}/api/admin/enrichment/internal/status/", self.backend_url);
        match tokio::time::timeout(STATUS_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                self.circuit_breakers.control_plane.record_success();
                response.json::<EnrichmentStatus>().await.ok()
            }
            Ok(Ok(response)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(status = %response.status(), "enrichment status check failed");
                None
            }
            Ok(Err(e)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(error = %e, "enrichment status request failed");
                None
            }
            Err(_) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!("enrichment status request timed out");
                None
            }
        }
    }

    pub async fn next_keyword(&self) -> Option<EnrichmentKeyword> {
        if !self.circuit_breakers.control_plane.allow() {
            return None;
        }
        let url = format!("{}/api/admin/enrichment/internal/keywords/", self.backend_url);
        match tokio::time::timeout(KEYWORDS_TIMEOUT, self.http.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                self.circuit_breakers.control_plane.record_success();
                match response.json::<Vec<EnrichmentKeyword>>().await {
                    Ok(mut keywords) if !keywords.is_empty() => Some(keywords.remove(0)),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode keyword list");
                        None
                    }
                }
            }
            Ok(Ok(response)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(status = %response.status(), "keyword fetch failed");
                None
            }
            Ok(Err(e)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(error = %e, "keyword fetch request failed");
                None
            }
            Err(_) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!("keyword fetch timed out");
                None
            }
        }
    }

    /// Best-effort callback; failures are logged, never surfaced (enrichment
    /// is best-effort per SPEC_FULL.md §4.5).
    pub async fn enrichment_callback(&self, payload: serde_json::Value) {
        if !self.circuit_breakers.control_plane.allow() {
            return;
        }
        let url = format!("{}/api/admin/enrichment/callback/", self.backend_url);
        let result = tokio::time::timeout(CALL_TIMEOUT, self.http.post(&url).json(&payload).send()).await;
        match result {
            Ok(Ok(response)) if response.status().is_success() => {
                self.circuit_breakers.control_plane.record_success();
            }
            Ok(Ok(response)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(status = %response.status(), "enrichment callback failed");
            }
            Ok(Err(e)) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!(error = %e, "enrichment callback request failed");
            }
            Err(_) => {
                self.circuit_breakers.control_plane.record_failure();
                tracing::warn!("enrichment callback timed out");
            }
        }
    }
}
