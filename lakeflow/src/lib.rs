//! Task and pipeline execution core for data collection plugins.
//!
//! A pipeline is a grid of tasks: rows run one after another, the tasks of a row
//! run concurrently. Each task invokes one plugin, which declares an ordered list
//! of subtasks. Plugins are compiled in, loaded from dynamic libraries, or driven
//! as child processes.
//!
//! ```no_run
//! use lakeflow::{ExecutionMode, LakeflowOptions, LakeflowRuntime, NewPipeline, PipelineTaskSpec};
//!
//! # async fn demo() -> lakeflow::LakeflowResult<()> {
//! let runtime = LakeflowRuntime::new(LakeflowOptions::from_env()).await?;
//! let pipeline = runtime.create_pipeline(&NewPipeline {
//!     name: "nightly".to_string(),
//!     plan: vec![vec![PipelineTaskSpec::new("gitextractor")]],
//!     ..Default::default()
//! })?;
//! runtime.run_pipeline(pipeline.id, ExecutionMode::parallel(4)).await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod logging;
pub mod migration;
pub mod models;
pub mod pipeline;
pub mod plugin;
pub mod runtime;
pub mod task;

pub use lakeflow_shared::errors::{LakeflowError, LakeflowResult, SubtaskError};
pub use logging::init_logging_for;
pub use migration::{MigrationScript, Migrator, PendingMigration};
pub use models::{
    NewPipeline, Pipeline, PipelineId, PipelinePlan, PipelineStatus, PipelineTaskSpec, SyncPolicy,
    Task, TaskId, TaskStatus,
};
pub use pipeline::{ExecutionMode, PipelineMetrics, TaskBatchRunner};
pub use plugin::{
    BasicRes, Plugin, PluginClose, PluginConnectionTest, PluginHandle, PluginInit,
    PluginMigration, PluginRegistry, PluginTask, SubtaskMeta, TaskData,
};
pub use runtime::{LakeflowOptions, LakeflowRuntime};
pub use task::{ProgressDetail, SubtaskContext, TaskContext};

#[doc(hidden)]
pub use inventory;
