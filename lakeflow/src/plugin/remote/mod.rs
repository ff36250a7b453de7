//! Out-of-process plugins.
//!
//! A remote plugin is a directory with a `run.sh` launcher. Its `plugin-info`
//! answer decides which capabilities the adapter exposes; every capability call is
//! then one launcher invocation (see [`Launcher::call`]).

mod invoke;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};
use lakeflow_shared::protocol::{Capability, PluginInfo, commands};

use super::{
    BasicRes, Plugin, PluginClose, PluginConnectionTest, PluginInit, PluginMigration, PluginTask,
    SubtaskMeta, TaskData,
};
use crate::migration::MigrationScript;
use crate::task::{SubtaskContext, TaskContext};

pub use invoke::Launcher;

/// Adapter exposing a remote plugin through the in-process capability traits.
pub struct RemotePlugin {
    info: PluginInfo,
    launcher: Arc<Launcher>,
}

impl RemotePlugin {
    /// Ask the launcher in `dir` for its metadata and build the adapter.
    pub async fn discover(dir: &Path) -> LakeflowResult<Self> {
        let fallback_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        let mut launcher = Launcher::new(fallback_name.clone(), dir);

        let data = launcher
            .call(
                commands::PLUGIN_INFO,
                &json!({}),
                &CancellationToken::new(),
                |_, _| {},
            )
            .await?;
        let info: PluginInfo = serde_json::from_value(data).map_err(|e| LakeflowError::Remote {
            plugin: fallback_name,
            command: commands::PLUGIN_INFO.to_string(),
            message: format!("invalid plugin info: {e}"),
        })?;
        if info.name.trim().is_empty() {
            return Err(LakeflowError::PluginLoad {
                path: dir.display().to_string(),
                reason: "plugin-info returned an empty name".to_string(),
            });
        }

        launcher.rename(&info.name);
        Ok(Self {
            info,
            launcher: Arc::new(launcher),
        })
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn call(&self, command: &str, context: &Value) -> LakeflowResult<Value> {
        self.launcher
            .call(command, context, &CancellationToken::new(), |_, _| {})
            .await
    }
}

fn task_context_json(ctx: &TaskContext) -> Value {
    json!({
        "task_id": ctx.task_id(),
        "pipeline_id": ctx.task().pipeline_id,
        "plugin": ctx.plugin_name(),
        "options": ctx.options(),
        "sync_policy": ctx.sync_policy(),
    })
}

impl Plugin for RemotePlugin {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn as_init(&self) -> Option<&dyn PluginInit> {
        self.info.supports(Capability::Init).then_some(self as &dyn PluginInit)
    }

    fn as_task(&self) -> Option<&dyn PluginTask> {
        self.info.supports(Capability::Task).then_some(self as &dyn PluginTask)
    }

    fn as_migration(&self) -> Option<&dyn PluginMigration> {
        (self.info.supports(Capability::Migration) || !self.info.migrations.is_empty())
            .then_some(self as &dyn PluginMigration)
    }

    fn as_connection_test(&self) -> Option<&dyn PluginConnectionTest> {
        self.info
            .supports(Capability::TestConnection)
            .then_some(self as &dyn PluginConnectionTest)
    }

    fn as_closeable(&self) -> Option<&dyn PluginClose> {
        self.info.supports(Capability::Close).then_some(self as &dyn PluginClose)
    }
}

#[async_trait]
impl PluginInit for RemotePlugin {
    async fn init(&self, res: &BasicRes) -> LakeflowResult<()> {
        let options = res.options();
        self.call(
            commands::INIT,
            &json!({
                "home_dir": options.home_dir,
                "database_path": options.database_path(),
            }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl PluginTask for RemotePlugin {
    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        self.info
            .subtasks
            .iter()
            .map(|remote| {
                let launcher = self.launcher.clone();
                let mut meta = SubtaskMeta::new(remote.name.clone(), move |ctx| {
                    let launcher = launcher.clone();
                    async move { run_remote_subtask(&launcher, ctx).await }
                })
                .with_description(remote.description.clone())
                .with_domain_types(remote.domain_types.clone());
                meta.enabled_by_default = remote.enabled_by_default;
                meta.required = remote.required;
                meta.force_run_on_resume = remote.force_run_on_resume;
                meta
            })
            .collect()
    }

    async fn prepare_task_data(&self, ctx: &TaskContext, options: &Value) -> LakeflowResult<TaskData> {
        if !self.info.supports(Capability::PrepareTaskData) {
            return Ok(Arc::new(options.clone()));
        }
        let data = self
            .launcher
            .call(
                commands::PREPARE_TASK_DATA,
                &task_context_json(ctx),
                ctx.cancel_token(),
                |_, _| {},
            )
            .await?;
        Ok(Arc::new(data))
    }
}

async fn run_remote_subtask(launcher: &Launcher, ctx: SubtaskContext) -> LakeflowResult<()> {
    let task_data = ctx
        .data::<Value>()
        .cloned()
        .unwrap_or(Value::Null);
    let mut context = task_context_json(ctx.task());
    context["subtask"] = json!(ctx.name());
    context["number"] = json!(ctx.number());
    context["task_data"] = task_data;

    let mut last_current = 0u64;
    let mut last_total = None;
    launcher
        .call(
            commands::RUN_SUBTASK,
            &context,
            ctx.cancel_token(),
            |current, total| {
                if total.is_some() && total != last_total {
                    ctx.set_total_records(total.unwrap_or_default());
                    last_total = total;
                }
                if current > last_current {
                    ctx.advance_records(current - last_current);
                    last_current = current;
                }
            },
        )
        .await
        .map(|_| ())
}

impl PluginMigration for RemotePlugin {
    fn migration_scripts(&self) -> Vec<MigrationScript> {
        self.info
            .migrations
            .iter()
            .map(|m| MigrationScript::new(m.version, m.name.clone(), m.sql.clone()))
            .collect()
    }
}

#[async_trait]
impl PluginConnectionTest for RemotePlugin {
    async fn test_connection(&self, options: &Value) -> LakeflowResult<()> {
        self.call(commands::TEST_CONNECTION, &json!({ "options": options }))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PluginClose for RemotePlugin {
    async fn close(&self, ctx: &TaskContext) -> LakeflowResult<()> {
        self.call(commands::CLOSE, &task_context_json(ctx))
            .await
            .map(|_| ())
    }
}
