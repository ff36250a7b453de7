//! Error model for the lakeflow execution core.
//!
//! Errors fall into four families:
//! - setup errors (duplicate plugin, unknown plugin, unknown subtask, double init)
//! - subtask errors, wrapped with the failing subtask's metadata
//! - recovered panics, carrying a call-stack summary
//! - cancellation, which is never suppressed by skip-on-fail

use thiserror::Error;

/// Result alias used throughout lakeflow.
pub type LakeflowResult<T> = Result<T, LakeflowError>;

#[derive(Debug, Error)]
pub enum LakeflowError {
    #[error("database error: {0}")]
    Database(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("plugin `{0}` is already registered")]
    DuplicatePlugin(String),

    #[error("plugin `{0}` is not registered")]
    PluginNotFound(String),

    #[error("subtask `{subtask}` is not declared by plugin `{plugin}`")]
    UnknownSubtask { plugin: String, subtask: String },

    #[error("{0} is already initialized")]
    AlreadyInitialized(String),

    #[error("failed to load plugin from {path}: {reason}")]
    PluginLoad { path: String, reason: String },

    /// Error raised by plugin code itself.
    #[error("{0}")]
    Plugin(String),

    #[error("remote plugin `{plugin}` failed on `{command}`: {message}")]
    Remote {
        plugin: String,
        command: String,
        message: String,
    },

    #[error(transparent)]
    Subtask(Box<SubtaskError>),

    #[error("panic: {message}")]
    Panic { message: String, backtrace: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{} task(s) failed: {}", .0.len(), join_messages(.0))]
    Tasks(Vec<LakeflowError>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A subtask entry point returned an error.
#[derive(Debug, Error)]
#[error("subtask {subtask} (#{number}) of plugin {plugin} ended unexpectedly: {source}")]
pub struct SubtaskError {
    pub plugin: String,
    pub subtask: String,
    pub number: usize,
    #[source]
    pub source: LakeflowError,
}

fn join_messages(errors: &[LakeflowError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LakeflowError {
    /// Wrap an error returned by a subtask entry point.
    pub fn subtask(
        plugin: impl Into<String>,
        subtask: impl Into<String>,
        number: usize,
        source: LakeflowError,
    ) -> Self {
        Self::Subtask(Box::new(SubtaskError {
            plugin: plugin.into(),
            subtask: subtask.into(),
            number,
            source,
        }))
    }

    /// Whether this error is, or wraps, a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Subtask(e) => e.source.is_cancelled(),
            Self::Tasks(errors) => errors.iter().any(LakeflowError::is_cancelled),
            _ => false,
        }
    }

    /// Name of the failing subtask when this error came out of one.
    pub fn failed_subtask(&self) -> Option<&str> {
        match self {
            Self::Subtask(e) => Some(e.subtask.as_str()),
            _ => None,
        }
    }

    /// Structured error name persisted next to the human-readable message.
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::Database(_) => "Database",
            Self::Storage(_) => "Storage",
            Self::Config(_) => "Config",
            Self::Internal(_) => "Internal",
            Self::NotFound(_) => "NotFound",
            Self::InvalidState(_) => "InvalidState",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::DuplicatePlugin(_) => "DuplicatePlugin",
            Self::PluginNotFound(_) => "PluginNotFound",
            Self::UnknownSubtask { .. } => "UnknownSubtask",
            Self::AlreadyInitialized(_) => "AlreadyInitialized",
            Self::PluginLoad { .. } => "PluginLoad",
            Self::Plugin(_) => "Plugin",
            Self::Remote { .. } => "Remote",
            Self::Subtask(e) => e.source.error_name(),
            Self::Panic { .. } => "Panic",
            Self::Cancelled => "Cancelled",
            Self::Tasks(_) => "Tasks",
            Self::Json(_) => "Json",
            Self::Io(_) => "Io",
        }
    }

    /// Message including the call-stack summary for recovered panics.
    pub fn detailed_message(&self) -> String {
        match self {
            Self::Panic { message, backtrace } if !backtrace.is_empty() => {
                format!("panic: {message}\n{backtrace}")
            }
            Self::Subtask(e) => match &e.source {
                Self::Panic { .. } => format!(
                    "subtask {} (#{}) of plugin {} ended unexpectedly: {}",
                    e.subtask,
                    e.number,
                    e.plugin,
                    e.source.detailed_message()
                ),
                _ => self.to_string(),
            },
            _ => self.to_string(),
        }
    }
}
