//! Pipeline execution.
//!
//! Runs the runnable tasks of a pipeline row by row. Each row is handed to a
//! [`TaskBatchRunner`]; the next row starts only after it returns.

use std::time::Instant;

use chrono::Utc;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::metrics::{PipelineMetrics, StageMetrics};
use super::stage::group_into_stages;
use super::task::TaskBatchRunner;
use crate::db::{Database, PipelineFinish, PipelineStore, TaskStore};
use crate::models::{PipelineId, PipelineStatus, TaskStatus, elapsed_seconds};

/// Pipeline executor.
///
/// Stage ordering is enforced here; concurrency inside a stage is the
/// [`TaskBatchRunner`]'s business.
pub struct PipelineExecutor {
    pipelines: PipelineStore,
    tasks: TaskStore,
}

impl PipelineExecutor {
    pub fn new(db: Database) -> Self {
        Self {
            pipelines: PipelineStore::new(db.clone()),
            tasks: TaskStore::new(db),
        }
    }

    /// Execute a pipeline.
    ///
    /// A CANCELLED pipeline returns immediately without touching anything. A stage
    /// error stops the loop on cancellation or when skip-on-fail is off; otherwise the
    /// next stage runs. The terminal status is written in every case except when
    /// marking a stage as running fails.
    pub async fn execute(
        &self,
        pipeline_id: PipelineId,
        run_tasks: &dyn TaskBatchRunner,
    ) -> LakeflowResult<PipelineMetrics> {
        let pipeline = self.pipelines.get(pipeline_id)?;
        if pipeline.status == PipelineStatus::Cancelled {
            tracing::info!(pipeline_id, "Pipeline is cancelled, not running");
            return Ok(PipelineMetrics::default());
        }

        let stages = group_into_stages(&self.tasks.runnable_by_pipeline(pipeline_id)?);
        let skip_on_fail = pipeline.sync_policy.skip_on_fail;
        let began_at = pipeline.began_at.unwrap_or_else(Utc::now);
        let total_start = Instant::now();

        let mut stage_metrics = Vec::new();
        let mut failure: Option<LakeflowError> = None;
        let mut swallowed = false;

        for stage in stages {
            if self.pipelines.get(pipeline_id)?.status == PipelineStatus::Cancelled {
                failure = Some(LakeflowError::Cancelled);
                break;
            }
            self.pipelines.mark_running(pipeline_id, stage.row, began_at)?;
            tracing::info!(pipeline_id, stage = stage.row, tasks = stage.task_ids.len(), "Running stage");

            let stage_start = Instant::now();
            let task_count = stage.task_ids.len();
            let result = run_tasks.run_tasks(stage.task_ids).await;
            stage_metrics.push(StageMetrics {
                row: stage.row,
                task_count,
                duration_ms: stage_start.elapsed().as_millis(),
                error: result.as_ref().err().map(ToString::to_string),
            });

            if let Err(e) = result {
                if e.is_cancelled() || !skip_on_fail {
                    failure = Some(e);
                    break;
                }
                tracing::warn!(pipeline_id, stage = stage.row, error = %e, "Stage failed, continuing");
                swallowed = true;
            }
        }

        let metrics = PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        };

        let partial = failure.is_none() && (swallowed || self.has_failed_tasks(pipeline_id)?);
        let status = match &failure {
            None if partial => PipelineStatus::Partial,
            None => PipelineStatus::Completed,
            Some(e) if e.is_cancelled() => PipelineStatus::Cancelled,
            Some(_) => PipelineStatus::Failed,
        };
        let finished_at = Utc::now();
        self.pipelines.finish(
            pipeline_id,
            &PipelineFinish {
                status,
                message: failure.as_ref().map(LakeflowError::detailed_message).unwrap_or_default(),
                error_name: failure
                    .as_ref()
                    .map(|e| e.error_name().to_string())
                    .unwrap_or_default(),
                finished_at,
                spent_seconds: elapsed_seconds(began_at, finished_at),
            },
        )?;

        tracing::info!(
            pipeline_id,
            status = %status,
            elapsed_ms = metrics.total_duration_ms as u64,
            "Pipeline finished"
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(metrics),
        }
    }

    fn has_failed_tasks(&self, pipeline_id: PipelineId) -> LakeflowResult<bool> {
        Ok(self
            .tasks
            .list_by_pipeline(pipeline_id)?
            .iter()
            .any(|t| t.status == TaskStatus::Failed))
    }
}
