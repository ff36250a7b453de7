//! Persisted records of the execution core.
//!
//! - `Pipeline`: an ordered plan of stages, each a set of concurrently runnable tasks
//! - `Task`: one plugin invocation at a (row, col) position of a pipeline
//! - `SubtaskRecord`: audit row of one declared subtask of one task
//! - `SubtaskState`: plugin-owned marker of the previous run's configuration

mod pipeline;
mod plan;
mod subtask;
mod sync_policy;
mod task;

pub use pipeline::{NewPipeline, Pipeline, PipelineStatus};
pub use plan::{PipelinePlan, PipelineStagePlan, PipelineTaskSpec};
pub use subtask::{SubtaskDescriptor, SubtaskRecord, SubtaskState};
pub use sync_policy::SyncPolicy;
pub use task::{Task, TaskStatus};

/// Database identifier of a pipeline.
pub type PipelineId = i64;

/// Database identifier of a task.
pub type TaskId = i64;

/// Whole seconds between two instants, never negative.
pub(crate) fn elapsed_seconds(
    began_at: chrono::DateTime<chrono::Utc>,
    finished_at: chrono::DateTime<chrono::Utc>,
) -> i64 {
    (finished_at - began_at).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_elapsed_seconds_never_negative() {
        let now = Utc::now();
        assert_eq!(elapsed_seconds(now, now + Duration::seconds(3)), 3);
        assert_eq!(elapsed_seconds(now, now - Duration::seconds(3)), 0);
        assert_eq!(elapsed_seconds(now, now + Duration::milliseconds(999)), 0);
    }
}
