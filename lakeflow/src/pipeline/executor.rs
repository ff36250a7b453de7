//! Bounded-parallel stage executor backed by [`TaskRunner`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::stage::ExecutionMode;
use super::task::TaskBatchRunner;
use crate::models::TaskId;
use crate::task::TaskRunner;

pub struct ParallelTaskExecutor {
    runner: Arc<TaskRunner>,
    cancel: CancellationToken,
    mode: ExecutionMode,
}

impl ParallelTaskExecutor {
    pub fn new(runner: Arc<TaskRunner>, cancel: CancellationToken, mode: ExecutionMode) -> Self {
        Self {
            runner,
            cancel,
            mode,
        }
    }
}

#[async_trait]
impl TaskBatchRunner for ParallelTaskExecutor {
    async fn run_tasks(&self, task_ids: Vec<TaskId>) -> LakeflowResult<()> {
        let results: Vec<LakeflowResult<()>> = stream::iter(task_ids)
            .map(|task_id| {
                let runner = self.runner.clone();
                let cancel = self.cancel.clone();
                async move {
                    tokio::spawn(async move { runner.run_task(cancel, task_id).await })
                        .await
                        .unwrap_or_else(|e| {
                            Err(LakeflowError::Internal(format!(
                                "task {task_id} worker failed: {e}"
                            )))
                        })
                }
            })
            .buffer_unordered(self.mode.concurrency())
            .collect()
            .await;

        aggregate_errors(results)
    }
}

/// Fold per-task outcomes: cancellation wins, a single error passes through as is,
/// several are reported together.
pub fn aggregate_errors(results: Vec<LakeflowResult<()>>) -> LakeflowResult<()> {
    let mut errors: Vec<LakeflowError> = results.into_iter().filter_map(Result::err).collect();
    if errors.iter().any(LakeflowError::is_cancelled) {
        return Err(LakeflowError::Cancelled);
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(LakeflowError::Tasks(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_errors() {
        assert!(aggregate_errors(vec![Ok(()), Ok(())]).is_ok());

        let single = aggregate_errors(vec![Ok(()), Err(LakeflowError::Plugin("x".into()))]);
        assert!(matches!(single, Err(LakeflowError::Plugin(_))));

        let many = aggregate_errors(vec![
            Err(LakeflowError::Plugin("a".into())),
            Err(LakeflowError::Plugin("b".into())),
        ]);
        assert!(matches!(many, Err(LakeflowError::Tasks(ref v)) if v.len() == 2));

        let cancelled = aggregate_errors(vec![
            Err(LakeflowError::Plugin("a".into())),
            Err(LakeflowError::subtask("p", "s", 1, LakeflowError::Cancelled)),
        ]);
        assert!(matches!(cancelled, Err(LakeflowError::Cancelled)));
    }
}
