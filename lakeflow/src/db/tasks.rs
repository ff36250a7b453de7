//! Task persistence.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::{
    Database, db_err, json_column, now_text, parsed_column, required_timestamp_column,
    timestamp_column,
};
use crate::models::{PipelineId, Task, TaskId, TaskStatus};

const TASK_COLUMNS: &str = "id, pipeline_id, pipeline_row, pipeline_col, plugin, subtasks, \
     options, status, message, error_name, progress, failed_sub_task, began_at, finished_at, \
     spent_seconds, created_at";

/// Terminal outcome written by the task finalizer.
#[derive(Debug, Clone)]
pub struct TaskFinish {
    pub status: TaskStatus,
    pub message: String,
    pub error_name: String,
    pub failed_sub_task: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub spent_seconds: i64,
}

#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, id: TaskId) -> LakeflowResult<Task> {
        let conn = self.db.conn();
        let task = db_err!(
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                row_to_task,
            )
            .optional()
        )?;
        task.ok_or_else(|| LakeflowError::NotFound(format!("task {id}")))
    }

    /// All tasks of a pipeline, ordered by (row, col).
    pub fn list_by_pipeline(&self, pipeline_id: PipelineId) -> LakeflowResult<Vec<Task>> {
        self.query_by_pipeline(pipeline_id, "")
    }

    /// Tasks the pipeline runner should pick up: CREATED, RERUN or RESUME, ordered by (row, col).
    pub fn runnable_by_pipeline(&self, pipeline_id: PipelineId) -> LakeflowResult<Vec<Task>> {
        self.query_by_pipeline(
            pipeline_id,
            "AND status IN ('CREATED', 'RERUN', 'RESUME')",
        )
    }

    fn query_by_pipeline(
        &self,
        pipeline_id: PipelineId,
        filter: &str,
    ) -> LakeflowResult<Vec<Task>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE pipeline_id = ?1 {filter} \
             ORDER BY pipeline_row, pipeline_col"
        )))?;
        let rows = db_err!(stmt.query_map(params![pipeline_id], row_to_task))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }

    /// Enter RUNNING. Clears the previous outcome but keeps progress and audit rows.
    pub fn mark_running(&self, id: TaskId, began_at: DateTime<Utc>) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE tasks SET status = ?2, began_at = ?3, finished_at = NULL, \
             spent_seconds = NULL, message = '', error_name = '', failed_sub_task = NULL, \
             updated_at = ?4 WHERE id = ?1",
            params![
                id,
                TaskStatus::Running.as_str(),
                began_at.to_rfc3339(),
                now_text(),
            ],
        ))?;
        ensure_updated(updated, id)
    }

    pub fn finish(&self, id: TaskId, finish: &TaskFinish) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE tasks SET status = ?2, message = ?3, error_name = ?4, failed_sub_task = ?5, \
             finished_at = ?6, spent_seconds = ?7, updated_at = ?8 WHERE id = ?1",
            params![
                id,
                finish.status.as_str(),
                finish.message,
                finish.error_name,
                finish.failed_sub_task,
                finish.finished_at.to_rfc3339(),
                finish.spent_seconds,
                now_text(),
            ],
        ))?;
        ensure_updated(updated, id)
    }

    pub fn update_progress(&self, id: TaskId, progress: f64) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE tasks SET progress = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, progress.clamp(0.0, 1.0), now_text()],
        ))?;
        ensure_updated(updated, id)
    }

    /// Move a task to an entry state such as RERUN or RESUME.
    pub fn set_status(&self, id: TaskId, status: TaskStatus) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_text()],
        ))?;
        ensure_updated(updated, id)
    }
}

fn ensure_updated(updated: usize, id: TaskId) -> LakeflowResult<()> {
    if updated == 0 {
        return Err(LakeflowError::NotFound(format!("task {id}")));
    }
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        pipeline_row: row.get(2)?,
        pipeline_col: row.get(3)?,
        plugin: row.get(4)?,
        subtasks: json_column(row, 5)?,
        options: json_column(row, 6)?,
        status: parsed_column(row, 7)?,
        message: row.get(8)?,
        error_name: row.get(9)?,
        progress: row.get(10)?,
        failed_sub_task: row.get(11)?,
        began_at: timestamp_column(row, 12)?,
        finished_at: timestamp_column(row, 13)?,
        spent_seconds: row.get(14)?,
        created_at: required_timestamp_column(row, 15)?,
    })
}
