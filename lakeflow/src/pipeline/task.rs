//! Caller-supplied stage executor.

use std::future::Future;

use async_trait::async_trait;
use lakeflow_shared::errors::LakeflowResult;

use crate::models::TaskId;

/// Runs all tasks of one stage and reports their combined outcome.
///
/// Concurrency inside a stage is entirely this trait's policy; the pipeline
/// executor only awaits it. Plain async closures implement it too.
#[async_trait]
pub trait TaskBatchRunner: Send + Sync {
    async fn run_tasks(&self, task_ids: Vec<TaskId>) -> LakeflowResult<()>;
}

#[async_trait]
impl<F, Fut> TaskBatchRunner for F
where
    F: Fn(Vec<TaskId>) -> Fut + Send + Sync,
    Fut: Future<Output = LakeflowResult<()>> + Send + 'static,
{
    async fn run_tasks(&self, task_ids: Vec<TaskId>) -> LakeflowResult<()> {
        (self)(task_ids).await
    }
}
