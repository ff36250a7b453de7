use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-pipeline sync policy, passed down unchanged to every task and subtask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Later stages keep running after a non-cancellation task failure.
    #[serde(default)]
    pub skip_on_fail: bool,
    /// Only collect changes after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_after: Option<DateTime<Utc>>,
    /// Disable every subtask whose name contains "collect".
    #[serde(default)]
    pub skip_collectors: bool,
    /// Plugins should ignore previous subtask state and resync everything.
    #[serde(default)]
    pub full_sync: bool,
}
