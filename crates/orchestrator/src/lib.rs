pub mod assignment;
pub mod circuit_breaker;
pub mod config;
pub mod control_plane;
pub mod enrichment;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod session;
pub mod state_store;
pub mod status_relay;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;

use queue::TaskQueue;
use registry::WorkerRegistry;
use status_relay::StatusRelay;

/// Shared application state accessible from axum handlers.
pub struct AppState {
    pub registry: Arc<WorkerRegistry>,
    pub queue: Arc<TaskQueue>,
    pub status_relay: StatusRelay,
    pub metrics_handle: PrometheusHandle,
    /// Observed by each worker session so it can send a `Goodbye` frame and
    /// close cleanly when the orchestrator shuts down (SPEC_FULL.md §5).
    pub shutdown_rx: watch::Receiver<bool>,
}

/// Assembles the HTTP + worker-session router described in SPEC_FULL.md §6.
/// Split out of `main` so integration tests can drive the full surface
/// in-process against a bound ephemeral port.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .route("/tasks/submit", post(routes::submit_task))
        .route("/tasks/pending", delete(routes::cancel_pending))
        .route("/tasks/{task_id}", get(routes::get_task))
        .route("/tasks/{task_id}", delete(routes::cancel_task))
        .route("/workers", get(routes::list_workers))
        .route("/workers/{api_type}/stats", get(routes::worker_stats))
        .route("/queue/stats", get(routes::queue_stats))
        .route("/worker", get(session::upgrade))
        .with_state(state)
}
