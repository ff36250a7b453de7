use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TaskId;

/// Audit row of one declared subtask of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskRecord {
    pub id: i64,
    pub task_id: TaskId,
    pub name: String,
    /// Sequence number within its kind (collectors and others count separately).
    pub number: i64,
    pub is_collector: bool,
    pub began_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub spent_seconds: Option<i64>,
    pub is_failed: bool,
    pub message: String,
    pub finished_records: i64,
}

/// Descriptor written for every catalog subtask before execution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskDescriptor {
    pub name: String,
    pub number: i64,
    pub is_collector: bool,
}

/// Configuration used by a plugin's previous run of one subtask in one scope.
///
/// Keyed by (plugin, subtask, params). The core only stores it; deciding between an
/// incremental run and a full resync is up to the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskState {
    pub plugin: String,
    pub subtask: String,
    /// Scope-identifying parameter string, e.g. serialized connection + board ids.
    pub params: String,
    pub prev_config: Value,
    pub prev_time_after: Option<DateTime<Utc>>,
    pub prev_started_at: Option<DateTime<Utc>>,
}
