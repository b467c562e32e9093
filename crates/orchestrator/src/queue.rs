use std::sync::Arc;

use chrono::Utc;
use orchestrator_common::{
    ApiType, OrchestratorError, QueueTypeStats, Result, Task, TaskId, TaskStatus, TaskSubmission,
    WorkerId, WorkerStatus,
};
use tokio::sync::{mpsc, Notify};

use crate::config::OrchestratorConfig;
use crate::registry::WorkerRegistry;
use crate::state_store::StateStore;

const API_TYPES: &[&str] = &["crunchbase", "tracxn", "social"];

fn queue_key(api_type: &ApiType) -> String {
    format!("task_queue:{api_type}")
}

fn task_key(task_id: TaskId) -> String {
    format!("task:{task_id}")
}

/// Per-`api_type` priority queues backed by the state store, plus the task
/// records and retry bookkeeping that ride alongside them.
///
/// Single-owner `Arc<TaskQueue>`: enqueue/pop/remove serialize through the
/// state store's atomic sorted-set operations, so no additional in-process
/// lock is needed (SPEC_FULL.md §5, shared-resource policy).
pub struct TaskQueue {
    store: Arc<dyn StateStore>,
    registry: Arc<WorkerRegistry>,
    config: Arc<OrchestratorConfig>,
    /// Signalled on enqueue and on any status change that may free a worker.
    assignment_signal: Notify,
    /// Emits every task that reaches a terminal state, for the enrichment
    /// manager's completion-wiring callback.
    terminal_tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn StateStore>,
        registry: Arc<WorkerRegistry>,
        config: Arc<OrchestratorConfig>,
    ) -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                registry,
                config,
                assignment_signal: Notify::new(),
                terminal_tx,
            },
            terminal_rx,
        )
    }

    pub fn notify_assignment(&self) {
        self.assignment_signal.notify_one();
    }

    pub async fn wait_for_signal_or_timeout(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.assignment_signal.notified()).await;
    }

    pub async fn enqueue(&self, submission: TaskSubmission) -> Result<Task> {
        let task = Task::new(submission, self.config.task_retry_limit);
        self.store_task(&task).await?;

        self.store
            .zadd(&queue_key(&task.api_type), &task.task_id.to_string(), -task.priority)
            .await
            .map_err(OrchestratorError::from)?;

        tracing::info!(task_id = %task.task_id, api_type = %task.api_type, action = %task.action, "task enqueued");
        metrics::counter!("orchestrator.tasks.enqueued", "api_type" => task.api_type.to_string())
            .increment(1);

        self.notify_assignment();
        Ok(task)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        let raw = self
            .store
            .get(&task_key(task_id))
            .await
            .map_err(OrchestratorError::from)?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Pop the top of the queue for `api_type` and assign it to an idle worker.
    /// Returns `None` if the queue is empty or no worker is idle (the task is
    /// re-inserted at its original priority in the latter case).
    pub async fn assign_next(&self, api_type: &ApiType) -> Result<Option<(Task, WorkerId)>> {
        let idle = self.registry.get_idle(api_type).await;
        if idle.is_empty() {
            return Ok(None);
        }

        let task_id = match self
            .store
            .zpopmin(&queue_key(api_type))
            .await
            .map_err(OrchestratorError::from)?
        {
            Some(id) => id,
            None => return Ok(None),
        };

        let task_id = TaskId::parse(&task_id)
            .map_err(|e| OrchestratorError::Internal(format!("corrupt task id in queue: {e}")))?;

        let mut task = match self.get_task(task_id).await? {
            Some(task) => task,
            None => {
                tracing::warn!(task_id = %task_id, "task popped from queue but record missing");
                return Ok(None);
            }
        };

        let worker = &idle[0];
        task.status = TaskStatus::Assigned;
        task.assigned_worker_id = Some(worker.worker_id);
        task.assigned_at = Some(Utc::now());
        self.store_task(&task).await?;

        self.registry
            .set_status(worker.worker_id, WorkerStatus::Working, Some(task_id))
            .await;

        tracing::info!(task_id = %task_id, worker_id = %worker.worker_id, "task assigned");
        metrics::counter!("orchestrator.tasks.assigned", "api_type" => api_type.to_string())
            .increment(1);

        Ok(Some((task, worker.worker_id)))
    }

    /// Repoints a non-terminal task's `assigned_worker_id` at a reconnected
    /// worker's fresh id, so the eventual `mark_completed`/`mark_failed`
    /// (and a cancel request in the meantime) reach the live session instead
    /// of the stale, now-deregistered one (SPEC_FULL.md §9 "Reconnect identity").
    pub async fn reassign_worker(&self, task_id: TaskId, worker_id: WorkerId) -> Result<()> {
        let Some(mut task) = self.get_task(task_id).await? else {
            return Ok(());
        };
        task.assigned_worker_id = Some(worker_id);
        self.store_task(&task).await
    }

    pub async fn mark_running(&self, task_id: TaskId) -> Result<()> {
        if let Some(mut task) = self.get_task(task_id).await? {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            self.store_task(&task).await?;
        }
        Ok(())
    }

    pub async fn mark_completed(&self, task_id: TaskId, result: serde_json::Value) -> Result<()> {
        let mut task = match self.get_task(task_id).await? {
            Some(task) => task,
            None => {
                tracing::warn!(task_id = %task_id, "complete received for unknown task");
                return Ok(());
            }
        };

        task.status = TaskStatus::Completed;
        task.result = Some(result);
        task.completed_at = Some(Utc::now());
        self.store_task(&task).await?;

        if let Some(worker_id) = task.assigned_worker_id {
            self.registry
                .set_status(worker_id, WorkerStatus::Idle, None)
                .await;
        }

        tracing::info!(task_id = %task_id, "task completed");
        metrics::counter!("orchestrator.tasks.completed", "api_type" => task.api_type.to_string())
            .increment(1);
        let _ = self.terminal_tx.send(task);
        self.notify_assignment();
        Ok(())
    }

    /// Failure path shared by worker-reported `error`, dispatch-send failure,
    /// and heartbeat-timeout eviction (SPEC_FULL.md §4.2).
    pub async fn mark_failed(&self, task_id: TaskId, error: &str) -> Result<()> {
        let mut task = match self.get_task(task_id).await? {
            Some(task) => task,
            None => {
                tracing::warn!(task_id = %task_id, "failure reported for unknown task");
                return Ok(());
            }
        };

        if task.status.is_terminal() {
            tracing::warn!(task_id = %task_id, "ignoring failure for already-terminal task");
            return Ok(());
        }

        task.retry_count += 1;
        task.error = Some(error.to_string());

        if let Some(worker_id) = task.assigned_worker_id.take() {
            self.registry
                .set_status(worker_id, WorkerStatus::Idle, None)
                .await;
        }

        if task.retry_count < task.max_retries {
            task.status = TaskStatus::Pending;
            task.assigned_at = None;
            task.started_at = None;
            self.store_task(&task).await?;

            self.store
                .zadd(&queue_key(&task.api_type), &task.task_id.to_string(), -task.priority)
                .await
                .map_err(OrchestratorError::from)?;

            tracing::warn!(task_id = %task_id, retry_count = task.retry_count, max_retries = task.max_retries, error = error, "task failed, retrying");
            self.notify_assignment();
        } else {
            task.status = TaskStatus::Failed;
            task.completed_at = Some(Utc::now());
            self.store_task(&task).await?;

            tracing::error!(task_id = %task_id, error = error, "task failed permanently");
            metrics::counter!("orchestrator.tasks.failed", "api_type" => task.api_type.to_string())
                .increment(1);
            let _ = self.terminal_tx.send(task);
        }
        Ok(())
    }

    /// Cancel a `pending` or `assigned` task. Returns `false` if not found or
    /// already running/terminal (idempotent: a second cancel of an
    /// already-cancelled task returns `true`, matching the terminal state).
    pub async fn cancel(&self, task_id: TaskId) -> Result<bool> {
        let mut task = match self.get_task(task_id).await? {
            Some(task) => task,
            None => return Ok(false),
        };

        if task.status == TaskStatus::Cancelled {
            return Ok(true);
        }
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) {
            return Ok(false);
        }

        self.store
            .zrem(&queue_key(&task.api_type), &task_id.to_string())
            .await
            .map_err(OrchestratorError::from)?;

        if let Some(worker_id) = task.assigned_worker_id {
            self.registry
                .set_status(worker_id, WorkerStatus::Idle, None)
                .await;
        }

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.store_task(&task).await?;

        tracing::info!(task_id = %task_id, "task cancelled");
        metrics::counter!("orchestrator.tasks.cancelled", "api_type" => task.api_type.to_string())
            .increment(1);
        let _ = self.terminal_tx.send(task);
        self.notify_assignment();
        Ok(true)
    }

    /// Cancel every pending task for `api_type`, returning the count cancelled.
    pub async fn cancel_pending(&self, api_type: &ApiType) -> Result<u64> {
        let mut count = 0;
        loop {
            let task_id = match self
                .store
                .zpopmin(&queue_key(api_type))
                .await
                .map_err(OrchestratorError::from)?
            {
                Some(id) => id,
                None => break,
            };

            let Ok(task_id) = TaskId::parse(&task_id) else {
                continue;
            };
            if let Some(mut task) = self.get_task(task_id).await? {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                self.store_task(&task).await?;
                let _ = self.terminal_tx.send(task);
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn queue_stats(&self) -> Result<std::collections::HashMap<String, QueueTypeStats>> {
        let mut stats = std::collections::HashMap::new();
        for api_type_str in API_TYPES {
            let api_type = ApiType::new(*api_type_str);
            let pending = self
                .store
                .zcard(&queue_key(&api_type))
                .await
                .map_err(OrchestratorError::from)?;
            let worker_stats = self.registry.stats(Some(&api_type)).await;

            stats.insert(
                api_type_str.to_string(),
                QueueTypeStats {
                    pending,
                    total_workers: worker_stats.total,
                    idle_workers: worker_stats.idle,
                    working_workers: worker_stats.working,
                },
            );
        }
        Ok(stats)
    }

    async fn store_task(&self, task: &Task) -> Result<()> {
        let ttl = if task.status.is_terminal() {
            self.config.task_terminal_ttl_secs()
        } else {
            self.config.task_pending_ttl_secs()
        };
        let json = serde_json::to_string(task)?;
        self.store
            .set(&task_key(task.task_id), &json, ttl)
            .await
            .map_err(OrchestratorError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStateStore;
    use orchestrator_common::TaskSource;

    fn test_config() -> Arc<OrchestratorConfig> {
        let mut config = OrchestratorConfig::from_env();
        config
            .worker_tokens
            .insert("crunchbase".into(), vec!["tok".into()]);
        Arc::new(config)
    }

    fn submission(priority: i64) -> TaskSubmission {
        TaskSubmission {
            api_type: ApiType::crunchbase(),
            action: "search_with_rank".into(),
            report_id: "r1".into(),
            payload: serde_json::json!({"q": "ai"}),
            priority: Some(priority),
            target_worker_id: None,
            source: Some(TaskSource::User),
        }
    }

    #[tokio::test]
    async fn higher_priority_assigned_first() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(WorkerRegistry::new(store.clone(), test_config()));
        let (queue, _rx) = TaskQueue::new(store, registry.clone(), test_config());

        let low = queue.enqueue(submission(0)).await.unwrap();
        let high = queue.enqueue(submission(10)).await.unwrap();

        let (tx, _rx2) = tokio::sync::mpsc::unbounded_channel();
        registry
            .register(ApiType::crunchbase(), Default::default(), tx)
            .await
            .unwrap();

        let (assigned, _worker_id) = queue
            .assign_next(&ApiType::crunchbase())
            .await
            .unwrap()
            .expect("assignment");
        assert_eq!(assigned.task_id, high.task_id);
        assert_ne!(assigned.task_id, low.task_id);
    }

    #[tokio::test]
    async fn no_idle_worker_returns_none() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(WorkerRegistry::new(store.clone(), test_config()));
        let (queue, _rx) = TaskQueue::new(store, registry, test_config());

        queue.enqueue(submission(0)).await.unwrap();
        let result = queue.assign_next(&ApiType::crunchbase()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn retry_then_fail_after_budget() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(WorkerRegistry::new(store.clone(), test_config()));
        let mut config = OrchestratorConfig::from_env();
        config
            .worker_tokens
            .insert("crunchbase".into(), vec!["tok".into()]);
        config.task_retry_limit = 1;
        let config = Arc::new(config);
        let (queue, _rx) = TaskQueue::new(store, registry, config);

        let task = queue.enqueue(submission(0)).await.unwrap();
        queue.mark_failed(task.task_id, "boom").await.unwrap();
        let retried = queue.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(retried.status, TaskStatus::Pending);
        assert_eq!(retried.retry_count, 1);

        queue.mark_failed(task.task_id, "boom again").await.unwrap();
        let failed = queue.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(WorkerRegistry::new(store.clone(), test_config()));
        let (queue, _rx) = TaskQueue::new(store, registry, test_config());

        let task = queue.enqueue(submission(0)).await.unwrap();
        assert!(queue.cancel(task.task_id).await.unwrap());
        assert!(queue.cancel(task.task_id).await.unwrap());
        let cancelled = queue.get_task(task.task_id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
    }
}
