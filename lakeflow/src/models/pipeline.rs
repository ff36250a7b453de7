use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lakeflow_shared::LakeflowError;
use serde::{Deserialize, Serialize};

use super::{PipelineId, PipelinePlan, SyncPolicy};

/// Pipeline lifecycle status.
///
/// ```text
/// CREATED ──→ RUNNING ──→ COMPLETED | PARTIAL | FAILED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Created,
    Running,
    Completed,
    /// Completed while skip-on-fail swallowed at least one task failure.
    Partial,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = LakeflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "PARTIAL" => Ok(Self::Partial),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(LakeflowError::Database(format!(
                "unknown pipeline status: {other}"
            ))),
        }
    }
}

/// Persisted pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
    pub blueprint_id: Option<i64>,
    pub plan: PipelinePlan,
    pub total_tasks: i64,
    /// Incremented once per finalized task, whatever its outcome.
    pub finished_tasks: i64,
    pub status: PipelineStatus,
    pub message: String,
    pub error_name: String,
    /// Row number of the stage currently (or last) executing; 0 before start.
    pub stage: i64,
    pub began_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub spent_seconds: Option<i64>,
    pub sync_policy: SyncPolicy,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a pipeline together with its task grid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPipeline {
    pub name: String,
    #[serde(default)]
    pub blueprint_id: Option<i64>,
    pub plan: PipelinePlan,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}
