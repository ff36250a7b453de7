//! Plugin contract.
//!
//! A plugin is a named handle exposing optional capabilities. Capabilities are
//! discovered through accessor methods on [`Plugin`] that return `None` unless the
//! plugin implements them, so the core never inspects concrete types.
//!
//! Three kinds of plugins end up in the same [`PluginRegistry`]:
//! - compiled-in plugins submitted with [`register_builtin_plugin!`](crate::register_builtin_plugin)
//! - native dynamic libraries exporting [`declare_plugin!`](crate::declare_plugin)
//! - remote plugins driven through a `run.sh` launcher ([`remote::RemotePlugin`])

mod builtin;
pub(crate) mod loader;
pub mod remote;
mod registry;
mod subtask;

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use lakeflow_shared::errors::LakeflowResult;

use crate::db::{Database, SubtaskStateStore};
use crate::migration::MigrationScript;
use crate::runtime::LakeflowOptions;
use crate::task::TaskContext;

pub use builtin::BuiltinPlugin;
pub use loader::NATIVE_ENTRY_SYMBOL;
pub use registry::PluginRegistry;
pub use subtask::{SubtaskEntryPoint, SubtaskMeta};

/// Shared handle to a registered plugin.
pub type PluginHandle = Arc<dyn Plugin>;

/// Opaque per-task value produced by `prepare_task_data` and handed to every subtask.
pub type TaskData = Arc<dyn Any + Send + Sync>;

/// Shared runtime resources handed to plugins.
#[derive(Clone)]
pub struct BasicRes {
    db: Database,
    options: Arc<LakeflowOptions>,
}

impl BasicRes {
    pub fn new(db: Database, options: Arc<LakeflowOptions>) -> Self {
        Self { db, options }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn options(&self) -> &LakeflowOptions {
        &self.options
    }

    /// Storage for the plugin's incremental-collection markers.
    pub fn subtask_states(&self) -> SubtaskStateStore {
        SubtaskStateStore::new(self.db.clone())
    }
}

/// A plugin: a name plus optional capabilities.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn as_init(&self) -> Option<&dyn PluginInit> {
        None
    }

    fn as_task(&self) -> Option<&dyn PluginTask> {
        None
    }

    fn as_migration(&self) -> Option<&dyn PluginMigration> {
        None
    }

    fn as_connection_test(&self) -> Option<&dyn PluginConnectionTest> {
        None
    }

    fn as_closeable(&self) -> Option<&dyn PluginClose> {
        None
    }
}

/// Called once with the shared resources before the plugin is registered.
#[async_trait]
pub trait PluginInit: Send + Sync {
    async fn init(&self, res: &BasicRes) -> LakeflowResult<()>;
}

/// Runnable as a pipeline task.
#[async_trait]
pub trait PluginTask: Send + Sync {
    /// Subtask catalog, in execution order.
    fn subtask_metas(&self) -> Vec<SubtaskMeta>;

    /// Turn the task's options into the value every subtask receives.
    ///
    /// The default passes the options through unchanged.
    async fn prepare_task_data(
        &self,
        _ctx: &TaskContext,
        options: &Value,
    ) -> LakeflowResult<TaskData> {
        Ok(Arc::new(options.clone()))
    }
}

/// Owns schema migrations applied after the framework's.
pub trait PluginMigration: Send + Sync {
    fn migration_scripts(&self) -> Vec<MigrationScript>;
}

#[async_trait]
pub trait PluginConnectionTest: Send + Sync {
    async fn test_connection(&self, options: &Value) -> LakeflowResult<()>;
}

/// Releases per-task resources once the subtask loop ends, whatever its outcome.
#[async_trait]
pub trait PluginClose: Send + Sync {
    async fn close(&self, ctx: &TaskContext) -> LakeflowResult<()>;
}

/// Export a plugin constructor from a native plugin library.
///
/// ```ignore
/// lakeflow::declare_plugin!(JiraPlugin::new);
/// ```
///
/// The library must be built with the same compiler and `lakeflow` version as the host.
#[macro_export]
macro_rules! declare_plugin {
    ($constructor:path) => {
        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _lakeflow_plugin_create() -> $crate::plugin::PluginHandle {
            let plugin = $constructor();
            ::std::sync::Arc::new(plugin)
        }
    };
}
