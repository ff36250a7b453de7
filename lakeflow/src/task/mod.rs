//! Task execution.
//!
//! ```text
//! TaskRunner::run_task
//!   └─ run_plugin_subtasks      (enabled set, audit rows, close)
//!        └─ subtask entry point (one `subtask` span each)
//!   progress events ──▶ ProgressAggregator ──▶ tasks.progress / subtasks.finished_records
//! ```

mod context;
mod progress;
mod runner;
mod selection;
mod subtasks;

pub use context::{SubtaskContext, TaskContext};
pub use progress::{
    ProgressBoard, ProgressDetail, ProgressEvent, ProgressSender, should_flush_records,
};
pub use runner::TaskRunner;
pub use selection::{is_collector, resolve_enabled_subtasks, subtask_descriptors};
pub use subtasks::run_plugin_subtasks;
