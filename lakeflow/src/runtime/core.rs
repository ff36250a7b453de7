//! Public runtime entry point.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::options::LakeflowOptions;
use super::rt_impl::{RuntimeInner, RuntimeInnerImpl, register_migrations};
use crate::db::{Database, PipelineStore, SubtaskStore, TaskStore};
use crate::migration::{Migrator, PendingMigration};
use crate::models::{
    NewPipeline, Pipeline, PipelineId, PipelineStatus, SubtaskRecord, Task, TaskId, TaskStatus,
};
use crate::pipeline::{
    ExecutionMode, ParallelTaskExecutor, PipelineExecutor, PipelineMetrics, TaskBatchRunner,
};
use crate::plugin::loader::activate;
use crate::plugin::{PluginHandle, PluginRegistry};
use crate::task::{ProgressDetail, resolve_enabled_subtasks};

// ============================================================================
// PUBLIC API
// ============================================================================

/// LakeflowRuntime owns the database, the plugin registry and the migrator, and
/// runs pipelines and tasks against them.
///
/// **Cloning**: Runtime is cheaply cloneable via `Arc` - all clones share the same state.
///
/// **Native plugins**: handles taken from [`registry`](Self::registry) must not
/// outlive the last clone of the runtime; their code is unmapped with it.
#[derive(Clone)]
pub struct LakeflowRuntime {
    inner: RuntimeInner,
}

impl LakeflowRuntime {
    /// Create a runtime.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - `home_dir` is relative
    /// - the filesystem layout or database cannot be created
    /// - any plugin fails to load or initialize
    /// - a migration fails (with `auto_migrate`)
    pub async fn new(options: LakeflowOptions) -> LakeflowResult<Self> {
        let inner = RuntimeInnerImpl::new(options).await?;
        Ok(Self { inner })
    }

    /// Runtime configured from the environment (see [`LakeflowOptions::from_env`]).
    pub async fn from_env() -> LakeflowResult<Self> {
        Self::new(LakeflowOptions::from_env()).await
    }

    pub fn options(&self) -> &LakeflowOptions {
        &self.inner.options
    }

    pub fn home_dir(&self) -> &Path {
        self.inner.layout.home_dir()
    }

    pub fn db(&self) -> &Database {
        &self.inner.db
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    pub fn migrator(&self) -> &Migrator {
        &self.inner.migrator
    }

    // ========================================================================
    // PLUGINS AND MIGRATIONS
    // ========================================================================

    /// Initialize and register a plugin after startup, queueing its migration
    /// scripts. Call [`migrate`](Self::migrate) to apply them.
    pub async fn register_plugin(&self, name: &str, plugin: PluginHandle) -> LakeflowResult<()> {
        activate(
            &self.inner.registry,
            &self.inner.res,
            name,
            plugin.clone(),
            "runtime",
        )
        .await?;
        register_migrations(&self.inner.migrator, name, &plugin)
    }

    pub fn pending_migrations(&self) -> LakeflowResult<Vec<PendingMigration>> {
        self.inner.migrator.pending()
    }

    /// Apply every pending migration. Returns how many ran.
    pub fn migrate(&self) -> LakeflowResult<usize> {
        self.inner.migrator.execute()
    }

    /// Run the connection test of `plugin` against `options`.
    pub async fn test_connection(&self, plugin: &str, options: &Value) -> LakeflowResult<()> {
        let handle = self.inner.registry.get(plugin)?;
        let tester = handle.as_connection_test().ok_or_else(|| {
            LakeflowError::InvalidArgument(format!(
                "plugin {plugin} does not support connection tests"
            ))
        })?;
        tester.test_connection(options).await
    }

    // ========================================================================
    // PIPELINES
    // ========================================================================

    /// Persist a pipeline and its task grid.
    ///
    /// Every task must name a registered plugin, and its requested subtasks must be
    /// declared by that plugin.
    pub fn create_pipeline(&self, new: &NewPipeline) -> LakeflowResult<Pipeline> {
        if new.plan.iter().all(Vec::is_empty) {
            return Err(LakeflowError::InvalidArgument(format!(
                "pipeline {} has no tasks",
                new.name
            )));
        }
        for spec in new.plan.iter().flatten() {
            let plugin = self.inner.registry.get(&spec.plugin)?;
            if let Some(task) = plugin.as_task() {
                resolve_enabled_subtasks(
                    &spec.plugin,
                    &task.subtask_metas(),
                    &spec.subtasks,
                    &new.sync_policy,
                )?;
            }
        }

        let pipeline = PipelineStore::new(self.inner.db.clone()).create(new)?;
        tracing::info!(
            pipeline_id = pipeline.id,
            name = %pipeline.name,
            tasks = pipeline.total_tasks,
            "Created pipeline"
        );
        Ok(pipeline)
    }

    pub fn get_pipeline(&self, id: PipelineId) -> LakeflowResult<Pipeline> {
        PipelineStore::new(self.inner.db.clone()).get(id)
    }

    /// Run a pipeline with the built-in stage executor.
    pub async fn run_pipeline(
        &self,
        id: PipelineId,
        mode: ExecutionMode,
    ) -> LakeflowResult<PipelineMetrics> {
        let (token, owned) = self.inner.acquire_token(id);
        let batch = ParallelTaskExecutor::new(self.inner.task_runner.clone(), token, mode);
        let result = PipelineExecutor::new(self.inner.db.clone())
            .execute(id, &batch)
            .await;
        if owned {
            self.inner.release_token(id);
        }
        result
    }

    /// Run a pipeline, handing each stage to `runner`.
    ///
    /// `runner` is responsible for running the tasks it is given; use
    /// [`run_task`](Self::run_task) from it to get the standard task lifecycle.
    pub async fn run_pipeline_with(
        &self,
        id: PipelineId,
        runner: &dyn TaskBatchRunner,
    ) -> LakeflowResult<PipelineMetrics> {
        PipelineExecutor::new(self.inner.db.clone())
            .execute(id, runner)
            .await
    }

    /// Mark a pipeline CANCELLED and signal its running tasks.
    ///
    /// Stages not yet started never run. Cancelling a finished pipeline fails.
    pub fn cancel_pipeline(&self, id: PipelineId) -> LakeflowResult<()> {
        let pipelines = PipelineStore::new(self.inner.db.clone());
        let pipeline = pipelines.get(id)?;
        if pipeline.status.is_terminal() {
            return Err(LakeflowError::InvalidState(format!(
                "pipeline {id} already finished with status {}",
                pipeline.status
            )));
        }
        pipelines.set_status(id, PipelineStatus::Cancelled)?;
        let signalled = self.inner.cancel_token(id);
        tracing::info!(pipeline_id = id, signalled, "Pipeline cancelled");
        Ok(())
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    /// Run a single task, outside of any pipeline loop.
    ///
    /// Shares the cancellation token of its pipeline when that pipeline is running.
    pub async fn run_task(&self, id: TaskId) -> LakeflowResult<()> {
        let task = self.get_task(id)?;
        let (token, owned) = self.inner.acquire_token(task.pipeline_id);
        let result = self.inner.task_runner.run_task(token, id).await;
        if owned {
            self.inner.release_token(task.pipeline_id);
        }
        result
    }

    /// Queue a task for another run. RERUN starts over; RESUME skips the subtasks a
    /// previous run finished.
    pub fn requeue_task(&self, id: TaskId, status: TaskStatus) -> LakeflowResult<()> {
        if !matches!(status, TaskStatus::Rerun | TaskStatus::Resume) {
            return Err(LakeflowError::InvalidArgument(format!(
                "task {id} can only be requeued as RERUN or RESUME, not {status}"
            )));
        }
        let tasks = TaskStore::new(self.inner.db.clone());
        if tasks.get(id)?.status == TaskStatus::Running {
            return Err(LakeflowError::InvalidState(format!("task {id} is running")));
        }
        tasks.set_status(id, status)
    }

    pub fn get_task(&self, id: TaskId) -> LakeflowResult<Task> {
        TaskStore::new(self.inner.db.clone()).get(id)
    }

    pub fn list_tasks(&self, pipeline_id: PipelineId) -> LakeflowResult<Vec<Task>> {
        TaskStore::new(self.inner.db.clone()).list_by_pipeline(pipeline_id)
    }

    pub fn list_subtasks(&self, task_id: TaskId) -> LakeflowResult<Vec<SubtaskRecord>> {
        SubtaskStore::new(self.inner.db.clone()).list(task_id)
    }

    /// Live progress of a running task.
    pub fn task_progress(&self, id: TaskId) -> Option<ProgressDetail> {
        self.inner.progress.get(id)
    }

    /// Live progress of every running task.
    pub fn progress_snapshot(&self) -> HashMap<TaskId, ProgressDetail> {
        self.inner.progress.snapshot()
    }
}

impl std::fmt::Debug for LakeflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LakeflowRuntime")
            .field("home_dir", &self.inner.layout.home_dir())
            .field("plugins", &self.inner.registry.names())
            .finish()
    }
}
