//! Stage grouping for grid-driven pipeline execution.

use crate::models::{Task, TaskId};

/// How a stage's tasks are scheduled by [`ParallelTaskExecutor`](super::ParallelTaskExecutor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run up to `max_concurrency` tasks at once.
    Parallel { max_concurrency: usize },
    /// Run tasks one after another.
    Sequential,
}

impl ExecutionMode {
    pub fn parallel(max_concurrency: usize) -> Self {
        Self::Parallel { max_concurrency }
    }

    pub(crate) fn concurrency(&self) -> usize {
        match self {
            Self::Parallel { max_concurrency } => (*max_concurrency).max(1),
            Self::Sequential => 1,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::parallel(4)
    }
}

/// One pipeline row: tasks that may run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// 1-indexed pipeline row.
    pub row: i64,
    pub task_ids: Vec<TaskId>,
}

/// Group tasks already ordered by (row, col) into stages of increasing row.
pub fn group_into_stages(tasks: &[Task]) -> Vec<Stage> {
    let mut stages: Vec<Stage> = Vec::new();
    for task in tasks {
        match stages.last_mut() {
            Some(stage) if stage.row == task.pipeline_row => stage.task_ids.push(task.id),
            _ => stages.push(Stage {
                row: task.pipeline_row,
                task_ids: vec![task.id],
            }),
        }
    }
    stages
}
