use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cell of a pipeline plan: a plugin invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineTaskSpec {
    pub plugin: String,
    /// Explicit subtask selection. Empty means "use the plugin's defaults".
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub options: Value,
}

impl PipelineTaskSpec {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            subtasks: Vec::new(),
            options: Value::Object(Default::default()),
        }
    }

    pub fn with_subtasks<I, S>(mut self, subtasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subtasks = subtasks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// Tasks of one stage; they may run concurrently.
pub type PipelineStagePlan = Vec<PipelineTaskSpec>;

/// Stages run strictly in order.
pub type PipelinePlan = Vec<PipelineStagePlan>;
