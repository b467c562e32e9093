use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{TaskId, WorkerId};
use crate::types::{ApiType, WorkerStatus};

/// Frames a worker sends over the session.
///
/// Closed, tagged union on the wire `type` field. An unrecognized `type`
/// does not fail deserialization of the session loop: the caller parses the
/// raw frame as [`serde_json::Value`] first and only attempts to decode it
/// into this enum, logging and dropping on mismatch (SPEC_FULL.md §4.4).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    Auth {
        api_type: ApiType,
        token: String,
        #[serde(default)]
        metadata: HashMap<String, Value>,
    },
    Heartbeat,
    Running {
        task_id: TaskId,
    },
    Status {
        task_id: TaskId,
        step_key: String,
        detail_type: String,
        message: String,
        #[serde(default)]
        data: Value,
    },
    Complete {
        task_id: TaskId,
        result: Value,
    },
    Error {
        task_id: TaskId,
        error: String,
    },
    Pong,
}

/// Frames the orchestrator sends over the session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthSuccess {
        worker_id: WorkerId,
    },
    AuthFailed {
        error: String,
    },
    HeartbeatAck {
        worker_id: WorkerId,
        status: WorkerStatus,
        current_task: Option<TaskId>,
    },
    Task {
        task_id: TaskId,
        report_id: String,
        action: String,
        payload: Value,
    },
    Cancel {
        task_id: TaskId,
    },
    Ping,
    /// Sent once, best-effort, before the orchestrator closes a session during
    /// shutdown (SPEC_FULL.md §5: "open sessions are closed with a goodbye
    /// frame").
    Goodbye,
}
