//! Single-task execution with guaranteed finalization.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::context::TaskContext;
use super::progress::{ProgressAggregator, ProgressBoard, progress_channel};
use super::subtasks::run_plugin_subtasks;
use crate::db::{PipelineStore, SubtaskStore, TaskFinish, TaskStore};
use crate::models::{Pipeline, SyncPolicy, Task, TaskId, TaskStatus, elapsed_seconds};
use crate::plugin::{BasicRes, PluginRegistry};

/// Longest call-stack summary kept on a task row.
const MAX_BACKTRACE_LEN: usize = 8 * 1024;

thread_local! {
    static PANIC_BACKTRACE: Cell<Option<String>> = const { Cell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a panic hook that records the panicking thread's backtrace, so a
/// contained panic reports where it happened rather than where it was caught.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            let _ = PANIC_BACKTRACE.try_with(|slot| slot.set(Some(backtrace)));
            previous(info);
        }));
    });
}

/// Runs one task from RUNNING to exactly one terminal status.
///
/// Plugin panics are contained here and turned into ordinary errors.
pub struct TaskRunner {
    registry: Arc<PluginRegistry>,
    res: BasicRes,
    board: Arc<ProgressBoard>,
    tasks: TaskStore,
    pipelines: PipelineStore,
}

impl TaskRunner {
    pub fn new(registry: Arc<PluginRegistry>, res: BasicRes, board: Arc<ProgressBoard>) -> Self {
        install_panic_hook();
        let db = res.db().clone();
        Self {
            registry,
            res,
            board,
            tasks: TaskStore::new(db.clone()),
            pipelines: PipelineStore::new(db),
        }
    }

    /// Run a task. A COMPLETED task returns immediately without any write.
    ///
    /// Once the task is RUNNING, every exit path persists a terminal status and
    /// increments the pipeline's finished counter. With `skip_on_fail`, a
    /// non-cancellation failure is recorded but not returned.
    pub async fn run_task(&self, cancel: CancellationToken, task_id: TaskId) -> LakeflowResult<()> {
        let task = self.tasks.get(task_id)?;
        if task.status == TaskStatus::Completed {
            tracing::debug!(task_id, "Task already completed, nothing to do");
            return Ok(());
        }
        let pipeline = self.pipelines.get(task.pipeline_id)?;

        let span = tracing::info_span!(
            "task",
            task_id,
            pipeline_id = pipeline.id,
            plugin = %task.plugin,
        );
        self.run_loaded(cancel, task, pipeline).instrument(span).await
    }

    async fn run_loaded(
        &self,
        cancel: CancellationToken,
        task: Task,
        pipeline: Pipeline,
    ) -> LakeflowResult<()> {
        let began_at = match (task.status, task.began_at) {
            (TaskStatus::Resume, Some(began_at)) => began_at,
            _ => Utc::now(),
        };
        self.tasks.mark_running(task.id, began_at)?;
        tracing::info!(status = %task.status, "Task started");

        let outcome = AssertUnwindSafe(self.execute(cancel, task.clone(), pipeline.sync_policy.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error(payload)));

        self.finalize(&task, &pipeline, began_at, outcome)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        task: Task,
        sync_policy: SyncPolicy,
    ) -> LakeflowResult<()> {
        let plugin = self.registry.get(&task.plugin)?;

        let (progress, rx) = progress_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let aggregator = ProgressAggregator::new(
            task.id,
            self.tasks.clone(),
            SubtaskStore::new(self.res.db().clone()),
            self.board.clone(),
        )
        .spawn(rx, done_rx);

        let ctx = Arc::new(TaskContext::new(
            task,
            sync_policy,
            cancel,
            self.res.clone(),
            progress,
        ));
        let result = run_plugin_subtasks(ctx, plugin.as_ref()).await;

        let _ = done_tx.send(());
        if let Err(e) = aggregator.await {
            tracing::warn!(error = %e, "Progress aggregator ended abnormally");
        }
        result
    }

    fn finalize(
        &self,
        task: &Task,
        pipeline: &Pipeline,
        began_at: DateTime<Utc>,
        outcome: LakeflowResult<()>,
    ) -> LakeflowResult<()> {
        let finished_at = Utc::now();
        let spent_seconds = elapsed_seconds(began_at, finished_at);

        let finish = match &outcome {
            Ok(()) => TaskFinish {
                status: TaskStatus::Completed,
                message: String::new(),
                error_name: String::new(),
                failed_sub_task: None,
                finished_at,
                spent_seconds,
            },
            Err(e) => TaskFinish {
                status: if e.is_cancelled() {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Failed
                },
                message: e.detailed_message(),
                error_name: e.error_name().to_string(),
                failed_sub_task: Some(e.failed_subtask().unwrap_or("unknown").to_string()),
                finished_at,
                spent_seconds,
            },
        };

        let persisted = self.tasks.finish(task.id, &finish);
        let counted = self.pipelines.increment_finished_tasks(pipeline.id);
        self.board.remove(task.id);

        match &outcome {
            Ok(()) => tracing::info!(spent_seconds, "Task completed"),
            Err(e) => tracing::error!(
                status = %finish.status,
                spent_seconds,
                error = %e,
                "Task finished with error"
            ),
        }

        match outcome {
            Err(e) if pipeline.sync_policy.skip_on_fail && !e.is_cancelled() => {
                tracing::warn!("Ignoring task failure because skip_on_fail is set");
                persisted?;
                counted
            }
            Err(e) => {
                if let Err(db) = persisted.and(counted) {
                    tracing::error!(error = %db, "Failed to persist task outcome");
                }
                Err(e)
            }
            Ok(()) => {
                persisted?;
                counted
            }
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> LakeflowError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    let mut backtrace = PANIC_BACKTRACE
        .try_with(Cell::take)
        .ok()
        .flatten()
        .unwrap_or_else(|| Backtrace::force_capture().to_string());
    if backtrace.len() > MAX_BACKTRACE_LEN {
        let mut cut = MAX_BACKTRACE_LEN;
        while !backtrace.is_char_boundary(cut) {
            cut -= 1;
        }
        backtrace.truncate(cut);
        backtrace.push_str("\n...");
    }

    LakeflowError::Panic { message, backtrace }
}
