use std::collections::VecDeque;

use orchestrator_common::{TaskId, WorkerFrame};
use tokio::sync::Mutex;

const COMPLETED_TASKS_CAP: usize = 100;

/// Agent-local bookkeeping that must survive a reconnect: the task currently
/// executing, a bounded history of completed task ids (duplicate protection),
/// and frames that must be delivered but could not be sent while disconnected
/// (SPEC_FULL.md §4.7).
pub struct AgentState {
    inner: Mutex<Inner>,
}

struct Inner {
    current_task_id: Option<TaskId>,
    completed_tasks: VecDeque<TaskId>,
    pending_messages: VecDeque<WorkerFrame>,
}

impl AgentState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_task_id: None,
                completed_tasks: VecDeque::new(),
                pending_messages: VecDeque::new(),
            }),
        }
    }

    pub async fn current_task_id(&self) -> Option<TaskId> {
        self.inner.lock().await.current_task_id
    }

    pub async fn is_completed(&self, task_id: TaskId) -> bool {
        self.inner.lock().await.completed_tasks.contains(&task_id)
    }

    pub async fn start_task(&self, task_id: TaskId) {
        self.inner.lock().await.current_task_id = Some(task_id);
    }

    /// Record `task_id` as done and free the in-progress slot, evicting the
    /// oldest completed id once the cap is exceeded.
    pub async fn finish_task(&self, task_id: TaskId) {
        let mut inner = self.inner.lock().await;
        inner.current_task_id = None;
        inner.completed_tasks.push_back(task_id);
        while inner.completed_tasks.len() > COMPLETED_TASKS_CAP {
            inner.completed_tasks.pop_front();
        }
    }

    pub async fn queue_pending(&self, frame: WorkerFrame) {
        self.inner.lock().await.pending_messages.push_back(frame);
    }

    /// Drain queued frames in FIFO order for re-send after reconnect.
    pub async fn drain_pending(&self) -> Vec<WorkerFrame> {
        self.inner.lock().await.pending_messages.drain(..).collect()
    }

    /// Re-queue a frame that failed to send during the flush, preserving order.
    pub async fn requeue_front(&self, frame: WorkerFrame) {
        self.inner.lock().await.pending_messages.push_front(frame);
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completed_tasks_evict_oldest_past_cap() {
        let state = AgentState::new();
        for _ in 0..(COMPLETED_TASKS_CAP + 10) {
            state.finish_task(TaskId::new()).await;
        }
        let inner = state.inner.lock().await;
        assert_eq!(inner.completed_tasks.len(), COMPLETED_TASKS_CAP);
    }

    #[tokio::test]
    async fn pending_messages_drain_in_order() {
        let state = AgentState::new();
        let a = TaskId::new();
        let b = TaskId::new();
        state
            .queue_pending(WorkerFrame::Complete {
                task_id: a,
                result: serde_json::json!({}),
            })
            .await;
        state
            .queue_pending(WorkerFrame::Complete {
                task_id: b,
                result: serde_json::json!({}),
            })
            .await;

        let drained = state.drain_pending().await;
        assert_eq!(drained.len(), 2);
        match &drained[0] {
            WorkerFrame::Complete { task_id, .. } => assert_eq!(*task_id, a),
            _ => panic!("unexpected frame"),
        }
    }
}
