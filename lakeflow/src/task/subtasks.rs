//! Sequential execution of a task's enabled subtasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::Instrument;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::context::{SubtaskContext, TaskContext};
use super::progress::ProgressEvent;
use super::selection::{resolve_enabled_subtasks, subtask_descriptors};
use crate::db::SubtaskStore;
use crate::models::{TaskStatus, elapsed_seconds};
use crate::plugin::{Plugin, PluginTask, SubtaskMeta};

/// Run every enabled subtask of `plugin` for the task in `ctx`, in catalog order.
///
/// A RERUN task starts from fresh audit rows. Any other entry state keeps them, so
/// subtasks that already finished successfully are skipped unless they are marked
/// `force_run_on_resume`. The plugin's `close` runs once afterwards, whatever the
/// outcome. A panic from a subtask is resumed after `close` so the caller still
/// sees it.
pub async fn run_plugin_subtasks(ctx: Arc<TaskContext>, plugin: &dyn Plugin) -> LakeflowResult<()> {
    let task_plugin = plugin.as_task().ok_or_else(|| {
        LakeflowError::Plugin(format!(
            "plugin {} cannot run as a task",
            ctx.plugin_name()
        ))
    })?;

    let metas = task_plugin.subtask_metas();
    let enabled = resolve_enabled_subtasks(
        ctx.plugin_name(),
        &metas,
        &ctx.task().subtasks,
        ctx.sync_policy(),
    )?;
    ctx.progress()
        .send(ProgressEvent::SetTotalSubtasks(enabled.len()));

    let store = SubtaskStore::new(ctx.db().clone());
    let descriptors = subtask_descriptors(&metas);
    if ctx.task().status == TaskStatus::Rerun {
        store.reset_descriptors(ctx.task_id(), &descriptors)?;
    } else {
        store.upsert_descriptors(ctx.task_id(), &descriptors)?;
    }

    let outcome = AssertUnwindSafe(run_enabled(&ctx, task_plugin, &metas, &enabled, &store))
        .catch_unwind()
        .await;

    let closed = match plugin.as_closeable() {
        Some(closeable) => closeable.close(&ctx).await,
        None => Ok(()),
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(payload) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "Plugin close failed after subtask panic");
            }
            std::panic::resume_unwind(payload);
        }
    };

    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            tracing::warn!(error = %close_err, "Plugin close failed after subtask failure");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

async fn run_enabled(
    ctx: &Arc<TaskContext>,
    task_plugin: &dyn PluginTask,
    metas: &[SubtaskMeta],
    enabled: &[String],
    store: &SubtaskStore,
) -> LakeflowResult<()> {
    let data = task_plugin
        .prepare_task_data(ctx, ctx.options())
        .await?;

    let mut number = 0;
    for meta in metas {
        if !enabled.contains(&meta.name) {
            continue;
        }
        number += 1;

        ctx.check_cancelled()?;
        ctx.progress().send(ProgressEvent::SetCurrentSubtask {
            name: meta.name.clone(),
            number,
        });

        if !meta.force_run_on_resume && store.finished_successfully(ctx.task_id(), &meta.name)? {
            tracing::info!(subtask = %meta.name, "Skipping subtask finished by a previous run");
            ctx.progress().send(ProgressEvent::AdvanceSubtask);
            continue;
        }

        let sub_ctx = SubtaskContext::new(ctx.clone(), meta.name.clone(), number, data.clone());
        run_subtask(sub_ctx, meta, store)
            .await
            .map_err(|e| LakeflowError::subtask(ctx.plugin_name(), &meta.name, number, e))?;

        ctx.progress().send(ProgressEvent::AdvanceSubtask);
    }
    Ok(())
}

async fn run_subtask(
    ctx: SubtaskContext,
    meta: &SubtaskMeta,
    store: &SubtaskStore,
) -> LakeflowResult<()> {
    let task_id = ctx.task().task_id();
    let number = ctx.number();
    let began_at = Utc::now();
    store.mark_started(task_id, &meta.name, began_at)?;

    let span = tracing::info_span!("subtask", subtask = %meta.name, number);
    let result = async {
        tracing::info!("Executing subtask");
        (meta.entry_point)(ctx).await
    }
    .instrument(span)
    .await;

    let finished_at = Utc::now();
    let failure = result.as_ref().err().map(LakeflowError::detailed_message);
    let recorded = store.mark_finished(
        task_id,
        &meta.name,
        finished_at,
        elapsed_seconds(began_at, finished_at),
        failure.as_deref(),
    );

    result?;
    recorded
}
