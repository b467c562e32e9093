use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, WorkerId};
use crate::types::ApiType;

/// Liveness/assignment state of a connected worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Offline => "offline",
        }
    }
}

/// A connected execution unit of a given `api_type`.
///
/// Invariants (see SPEC_FULL.md §3): `status == Working` implies
/// `current_task_id.is_some()`; `status == Idle` implies `current_task_id.is_none()`;
/// `last_heartbeat` is monotonically non-decreasing while connected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: WorkerId,
    pub api_type: ApiType,
    pub status: WorkerStatus,
    pub current_task_id: Option<TaskId>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Worker {
    pub fn new(
        worker_id: WorkerId,
        api_type: ApiType,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            worker_id,
            api_type,
            status: WorkerStatus::Idle,
            current_task_id: None,
            metadata,
            connected_at: now,
            last_heartbeat: now,
        }
    }

    /// The `in_progress_task` the worker advertised at auth time, if any.
    ///
    /// A reconnecting agent names the task it was executing across the drop
    /// (SPEC_FULL.md §4.7, "Reconnect safety"); the orchestrator never invents
    /// this value, it only reads what the agent claims in `metadata`.
    pub fn advertised_in_progress_task(&self) -> Option<TaskId> {
        self.metadata
            .get("in_progress_task")
            .and_then(|v| v.as_str())
            .and_then(|s| TaskId::parse(s).ok())
    }
}

/// Aggregate worker counts for a given (or all) api_type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total: u32,
    pub idle: u32,
    pub working: u32,
    pub offline: u32,
}
