use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lakeflow_shared::LakeflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PipelineId, TaskId};

/// Task status state machine.
///
/// ```text
/// CREATED ─┐
/// RERUN  ──┼──→ RUNNING ──→ COMPLETED | FAILED | CANCELLED | PARTIAL
/// RESUME ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Rerun,
    Resume,
    Running,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Rerun => "RERUN",
            Self::Resume => "RESUME",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Partial => "PARTIAL",
        }
    }

    /// Entry states picked up by the pipeline runner.
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Created | Self::Rerun | Self::Resume)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Partial
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = LakeflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RERUN" => Ok(Self::Rerun),
            "RESUME" => Ok(Self::Resume),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "PARTIAL" => Ok(Self::Partial),
            other => Err(LakeflowError::Database(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Persisted task: one plugin invocation inside a pipeline cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub pipeline_id: PipelineId,
    /// 1-indexed stage row.
    pub pipeline_row: i64,
    pub pipeline_col: i64,
    pub plugin: String,
    pub subtasks: Vec<String>,
    pub options: Value,
    pub status: TaskStatus,
    pub message: String,
    pub error_name: String,
    /// Fraction of enabled subtasks finished, in `[0, 1]`.
    pub progress: f64,
    pub failed_sub_task: Option<String>,
    pub began_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub spent_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}
