//! Grid-driven pipeline execution.
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages (rows) → Tasks (cells)
//!
//! - PipelineExecutor: walks the rows in order, persists stage and terminal status
//! - TaskBatchRunner: runs one row; ParallelTaskExecutor bounds its concurrency
//! - TaskRunner: runs one cell (see `crate::task`)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let executor = PipelineExecutor::new(db.clone());
//! let batch = ParallelTaskExecutor::new(task_runner, cancel, ExecutionMode::parallel(4));
//! let metrics = executor.execute(pipeline_id, &batch).await?;
//! println!("pipeline took {}ms", metrics.total_duration_ms);
//! ```

mod executor;
mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use executor::{ParallelTaskExecutor, aggregate_errors};
pub use metrics::{PipelineMetrics, StageMetrics};
pub use pipeline::PipelineExecutor;
pub use stage::{ExecutionMode, Stage, group_into_stages};
pub use task::TaskBatchRunner;
