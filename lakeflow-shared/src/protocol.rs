//! Remote plugin protocol.
//!
//! A remote plugin is a directory holding a launcher (`run.sh`). Every call is one
//! child process: the host runs `run.sh <command>`, writes a single JSON context line
//! to stdin and closes it. The plugin answers on stdout with newline-delimited JSON
//! messages: any number of `log` / `progress` messages followed by exactly one
//! terminal `result` or `error`.
//!
//! ```text
//! host                          run.sh run-subtask
//!  │── {"subtask":"collect",...}\n ──▶│
//!  │◀── {"type":"progress","current":10,"total":100}
//!  │◀── {"type":"log","level":"info","message":"page 1"}
//!  │◀── {"type":"result","data":null}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed name of the launcher inside a remote plugin directory.
pub const LAUNCHER_FILE: &str = "run.sh";

/// Command names understood by remote plugin launchers.
pub mod commands {
    pub const PLUGIN_INFO: &str = "plugin-info";
    pub const INIT: &str = "init";
    pub const PREPARE_TASK_DATA: &str = "prepare-task-data";
    pub const RUN_SUBTASK: &str = "run-subtask";
    pub const TEST_CONNECTION: &str = "test-connection";
    pub const CLOSE: &str = "close";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line written by a remote plugin on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteMessage {
    Log {
        level: LogLevel,
        message: String,
    },
    /// Absolute record progress of the running subtask.
    Progress {
        current: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },
    Result {
        #[serde(default)]
        data: Value,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl RemoteMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result { .. } | Self::Error { .. })
    }
}

/// Capabilities a remote plugin can advertise in `plugin-info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Init,
    Task,
    Migration,
    TestConnection,
    PrepareTaskData,
    Close,
}

/// Response payload of `plugin-info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options_schema: Value,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub subtasks: Vec<RemoteSubtaskMeta>,
    #[serde(default)]
    pub migrations: Vec<RemoteMigration>,
}

impl PluginInfo {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

fn default_true() -> bool {
    true
}

/// Subtask catalog entry declared by a remote plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubtaskMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub force_run_on_resume: bool,
    #[serde(default)]
    pub domain_types: Vec<String>,
}

/// Schema migration shipped by a remote plugin; the host executes `sql`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMigration {
    pub version: u64,
    pub name: String,
    pub sql: String,
}

/// Parse one stdout line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<RemoteMessage>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Encode a context object as one newline-terminated line.
pub fn encode_context(context: &Value) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(context)?;
    line.push('\n');
    Ok(line)
}
