use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use orchestrator_common::{OrchestratorError, Result, Worker, WorkerId, WorkerStats, WorkerStatus};
use tokio::sync::{mpsc, RwLock};

use crate::config::OrchestratorConfig;
use crate::state_store::StateStore;

/// Outbound half of a worker's session: any component can push a frame to a
/// worker without holding the session task itself.
pub type Connection = mpsc::UnboundedSender<orchestrator_common::ServerFrame>;

/// Tracks connected workers, authenticates new sessions, and monitors liveness.
///
/// The in-memory maps are the hot path; the state store mirrors `workers` for
/// cross-restart visibility only (see SPEC_FULL.md §4.1's implementation note).
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Worker>>,
    connections: RwLock<HashMap<WorkerId, Connection>>,
    store: Arc<dyn StateStore>,
    config: Arc<OrchestratorConfig>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn StateStore>, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            store,
            config,
        }
    }

    /// Validate `token` against the configured token set for `api_type`.
    pub fn authenticate(&self, api_type: &str, token: &str) -> bool {
        self.config
            .worker_tokens
            .get(api_type)
            .is_some_and(|tokens| tokens.iter().any(|t| t == token))
    }

    /// Register a freshly authenticated worker, returning the assigned id.
    pub async fn register(
        &self,
        api_type: orchestrator_common::ApiType,
        metadata: HashMap<String, serde_json::Value>,
        connection: Connection,
    ) -> Result<WorkerId> {
        let worker = Worker::new(WorkerId::new(), api_type, metadata);
        let worker_id = worker.worker_id;

        self.persist(&worker).await?;

        self.workers.write().await.insert(worker_id, worker);
        self.connections.write().await.insert(worker_id, connection);

        tracing::info!(worker_id = %worker_id, "worker registered");
        metrics::gauge!("orchestrator.workers.connected").increment(1.0);

        Ok(worker_id)
    }

    /// Remove a worker from the registry (disconnect, auth failure cleanup never reaches here).
    pub async fn unregister(&self, worker_id: WorkerId) {
        let worker = {
            let mut workers = self.workers.write().await;
            workers.remove(&worker_id)
        };
        self.connections.write().await.remove(&worker_id);

        if let Some(mut worker) = worker {
            worker.status = WorkerStatus::Offline;
            let _ = self.store.delete(&format!("worker:{worker_id}")).await;
            let _ = self
                .store
                .srem(&format!("workers:{}", worker.api_type), &worker_id.to_string())
                .await;
            tracing::info!(worker_id = %worker_id, "worker unregistered");
            metrics::gauge!("orchestrator.workers.connected").decrement(1.0);
        }
    }

    pub async fn update_heartbeat(&self, worker_id: WorkerId) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(&worker_id) {
            worker.last_heartbeat = Utc::now();
            let worker = worker.clone();
            drop(workers);
            let _ = self.persist(&worker).await;
        }
    }

    pub async fn set_status(
        &self,
        worker_id: WorkerId,
        status: WorkerStatus,
        task_id: Option<orchestrator_common::TaskId>,
    ) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(&worker_id) {
            worker.status = status;
            worker.current_task_id = task_id;
            let worker = worker.clone();
            drop(workers);
            let _ = self.persist(&worker).await;
        }
    }

    pub async fn get(&self, worker_id: WorkerId) -> Option<Worker> {
        self.workers.read().await.get(&worker_id).cloned()
    }

    pub async fn get_connection(&self, worker_id: WorkerId) -> Option<Connection> {
        self.connections.read().await.get(&worker_id).cloned()
    }

    pub async fn get_idle(&self, api_type: &orchestrator_common::ApiType) -> Vec<Worker> {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| &w.api_type == api_type && w.status == WorkerStatus::Idle)
            .cloned()
            .collect()
    }

    pub async fn get_by_type(&self, api_type: &orchestrator_common::ApiType) -> Vec<Worker> {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| &w.api_type == api_type)
            .cloned()
            .collect()
    }

    pub async fn get_all(&self) -> Vec<Worker> {
        self.workers.read().await.values().cloned().collect()
    }

    pub async fn stats(&self, api_type: Option<&orchestrator_common::ApiType>) -> WorkerStats {
        let workers = self.workers.read().await;
        let mut stats = WorkerStats::default();
        for worker in workers.values() {
            if let Some(api_type) = api_type {
                if &worker.api_type != api_type {
                    continue;
                }
            }
            stats.total += 1;
            match worker.status {
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Working => stats.working += 1,
                WorkerStatus::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// Heartbeat monitor loop: wakes every `WORKER_HEARTBEAT_INTERVAL` seconds and
    /// evicts any worker whose `last_heartbeat` is older than its applicable
    /// threshold, releasing its current task back to the queue on eviction.
    pub async fn run_heartbeat_monitor(
        self: Arc<Self>,
        queue: Arc<crate::queue::TaskQueue>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        tracing::info!("heartbeat monitor started");
        let interval = std::time::Duration::from_secs(self.config.worker_heartbeat_interval_secs);
        let idle_timeout = chrono::Duration::seconds(self.config.worker_timeout_secs as i64);
        let working_timeout =
            chrono::Duration::seconds(self.config.worker_working_timeout_secs() as i64);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let stale: Vec<WorkerId> = {
                let workers = self.workers.read().await;
                workers
                    .values()
                    .filter(|w| {
                        let elapsed = now - w.last_heartbeat;
                        if w.status == WorkerStatus::Working {
                            elapsed > working_timeout
                        } else {
                            elapsed > idle_timeout
                        }
                    })
                    .map(|w| w.worker_id)
                    .collect()
            };

            for worker_id in stale {
                let current_task = self
                    .workers
                    .read()
                    .await
                    .get(&worker_id)
                    .and_then(|w| w.current_task_id);

                tracing::warn!(worker_id = %worker_id, "worker heartbeat timed out, evicting");
                if let Some(conn) = self.get_connection(worker_id).await {
                    // Best-effort: the session task notices the channel close and exits.
                    drop(conn);
                }
                self.unregister(worker_id).await;

                if let Some(task_id) = current_task {
                    if let Err(e) = queue.mark_failed(task_id, "worker timed out").await {
                        tracing::error!(task_id = %task_id, error = %e, "failed to fail task after worker timeout");
                    }
                }
            }
        }
        tracing::info!("heartbeat monitor shutting down");
    }

    async fn persist(&self, worker: &Worker) -> Result<()> {
        let json = serde_json::to_string(worker)?;
        self.store
            .set(
                &format!("worker:{}", worker.worker_id),
                &json,
                self.config.worker_ttl_secs(),
            )
            .await
            .map_err(OrchestratorError::from)?;
        self.store
            .sadd(
                &format!("workers:{}", worker.api_type),
                &worker.worker_id.to_string(),
            )
            .await
            .map_err(OrchestratorError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStateStore;
    use std::collections::HashMap;

    fn test_config() -> Arc<OrchestratorConfig> {
        let mut config = OrchestratorConfig::from_env();
        config
            .worker_tokens
            .insert("crunchbase".into(), vec!["tok".into()]);
        Arc::new(config)
    }

    #[tokio::test]
    async fn register_then_get_idle() {
        let registry = WorkerRegistry::new(Arc::new(InMemoryStateStore::new()), test_config());
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker_id = registry
            .register(orchestrator_common::ApiType::crunchbase(), HashMap::new(), tx)
            .await
            .unwrap();

        let idle = registry.get_idle(&orchestrator_common::ApiType::crunchbase()).await;
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].worker_id, worker_id);
    }

    #[tokio::test]
    async fn working_worker_is_not_idle() {
        let registry = WorkerRegistry::new(Arc::new(InMemoryStateStore::new()), test_config());
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker_id = registry
            .register(orchestrator_common::ApiType::crunchbase(), HashMap::new(), tx)
            .await
            .unwrap();

        registry
            .set_status(worker_id, WorkerStatus::Working, None)
            .await;

        let idle = registry.get_idle(&orchestrator_common::ApiType::crunchbase()).await;
        assert!(idle.is_empty());
    }

    #[tokio::test]
    async fn authenticate_checks_token_set() {
        let registry = WorkerRegistry::new(Arc::new(InMemoryStateStore::new()), test_config());
        assert!(registry.authenticate("crunchbase", "tok"));
        assert!(!registry.authenticate("crunchbase", "wrong"));
        assert!(!registry.authenticate("unknown_type", "tok"));
    }
}
