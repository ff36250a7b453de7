use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use lakeflow_shared::errors::LakeflowResult;

use crate::task::SubtaskContext;

/// Entry function of one subtask.
pub type SubtaskEntryPoint =
    Arc<dyn Fn(SubtaskContext) -> BoxFuture<'static, LakeflowResult<()>> + Send + Sync>;

/// One entry of a plugin's subtask catalog.
#[derive(Clone)]
pub struct SubtaskMeta {
    pub name: String,
    pub entry_point: SubtaskEntryPoint,
    pub enabled_by_default: bool,
    /// Always runs, whatever the task's selection or sync policy says.
    pub required: bool,
    /// Runs again on RESUME even if a previous run finished it.
    pub force_run_on_resume: bool,
    pub description: String,
    pub domain_types: Vec<String>,
}

impl SubtaskMeta {
    pub fn new<F, Fut>(name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(SubtaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = LakeflowResult<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            entry_point: Arc::new(move |ctx| entry(ctx).boxed()),
            enabled_by_default: true,
            required: false,
            force_run_on_resume: false,
            description: String::new(),
            domain_types: Vec::new(),
        }
    }

    pub fn disabled_by_default(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn force_run_on_resume(mut self) -> Self {
        self.force_run_on_resume = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_domain_types<I, S>(mut self, domain_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_types = domain_types.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for SubtaskMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtaskMeta")
            .field("name", &self.name)
            .field("enabled_by_default", &self.enabled_by_default)
            .field("required", &self.required)
            .field("force_run_on_resume", &self.force_run_on_resume)
            .field("domain_types", &self.domain_types)
            .finish_non_exhaustive()
    }
}
