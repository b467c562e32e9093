use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{TaskId, WorkerId};
use crate::types::ApiType;

/// Where a task submission originated. User tasks and enrichment tasks share
/// the same queue and assignment path; `source` exists so completion handlers
/// know whether to notify the enrichment control-plane callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    User,
    Enrichment,
}

/// Lifecycle state of a task. Terminal states (`Completed`, `Failed`, `Cancelled`)
/// are final — no further transitions are valid once reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A unit of work queued at a priority and executed by exactly one worker at a time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub report_id: String,
    pub api_type: ApiType,
    pub action: String,
    pub payload: Value,
    pub priority: i64,
    pub status: TaskStatus,
    pub assigned_worker_id: Option<WorkerId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub source: TaskSource,
    pub created_at: DateTime<Utc>,
}

/// Inbound submission for a new task, as received on `POST /tasks/submit`.
#[derive(Clone, Debug, Deserialize)]
pub struct TaskSubmission {
    pub api_type: ApiType,
    pub action: String,
    pub report_id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Option<i64>,
    /// Reserved for future worker pinning; not used by the assignment loop today.
    #[serde(default)]
    pub target_worker_id: Option<WorkerId>,
    #[serde(default)]
    pub source: Option<TaskSource>,
}

impl Task {
    pub fn new(submission: TaskSubmission, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::new(),
            report_id: submission.report_id,
            api_type: submission.api_type,
            action: submission.action,
            payload: submission.payload,
            priority: submission.priority.unwrap_or(0),
            status: TaskStatus::Pending,
            assigned_worker_id: None,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            result: None,
            error: None,
            source: submission.source.unwrap_or(TaskSource::User),
            created_at: now,
        }
    }
}

/// Per-`api_type` queue depth/worker-count snapshot, as returned from `GET /queue/stats`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueTypeStats {
    pub pending: u64,
    pub total_workers: u32,
    pub idle_workers: u32,
    pub working_workers: u32,
}
