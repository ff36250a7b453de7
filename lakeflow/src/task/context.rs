use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::progress::{ProgressEvent, ProgressSender};
use crate::db::{Database, SubtaskStateStore};
use crate::models::{SyncPolicy, Task, TaskId};
use crate::plugin::{BasicRes, TaskData};

/// Everything a plugin sees while one task runs.
pub struct TaskContext {
    task: Task,
    sync_policy: SyncPolicy,
    cancel: CancellationToken,
    res: BasicRes,
    progress: ProgressSender,
}

impl TaskContext {
    pub fn new(
        task: Task,
        sync_policy: SyncPolicy,
        cancel: CancellationToken,
        res: BasicRes,
        progress: ProgressSender,
    ) -> Self {
        Self {
            task,
            sync_policy,
            cancel,
            res,
            progress,
        }
    }

    /// The task as loaded before it entered RUNNING.
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn plugin_name(&self) -> &str {
        &self.task.plugin
    }

    pub fn options(&self) -> &Value {
        &self.task.options
    }

    pub fn sync_policy(&self) -> &SyncPolicy {
        &self.sync_policy
    }

    pub fn res(&self) -> &BasicRes {
        &self.res
    }

    pub fn db(&self) -> &Database {
        self.res.db()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> LakeflowResult<()> {
        if self.cancel.is_cancelled() {
            return Err(LakeflowError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn progress(&self) -> &ProgressSender {
        &self.progress
    }
}

/// Context of one running subtask. Cheap to clone.
#[derive(Clone)]
pub struct SubtaskContext {
    task: Arc<TaskContext>,
    name: String,
    number: usize,
    data: TaskData,
}

impl SubtaskContext {
    pub fn new(task: Arc<TaskContext>, name: String, number: usize, data: TaskData) -> Self {
        Self {
            task,
            name,
            number,
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based position among the task's enabled subtasks.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn task(&self) -> &TaskContext {
        &self.task
    }

    /// The value produced by `prepare_task_data`, downcast to `T`.
    pub fn data<T: Send + Sync + 'static>(&self) -> LakeflowResult<&T> {
        self.data.downcast_ref::<T>().ok_or_else(|| {
            LakeflowError::Internal(format!(
                "task data of plugin {} is not a {}",
                self.task.plugin_name(),
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn sync_policy(&self) -> &SyncPolicy {
        self.task.sync_policy()
    }

    pub fn db(&self) -> &Database {
        self.task.db()
    }

    pub fn subtask_states(&self) -> SubtaskStateStore {
        self.task.res().subtask_states()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.task.cancel_token()
    }

    pub fn check_cancelled(&self) -> LakeflowResult<()> {
        self.task.check_cancelled()
    }

    pub fn set_total_records(&self, total: u64) {
        self.task.progress().send(ProgressEvent::SetTotalRecords(total));
    }

    pub fn advance_records(&self, delta: u64) {
        if delta > 0 {
            self.task.progress().send(ProgressEvent::AdvanceRecords(delta));
        }
    }
}
