//! Per-task subtask audit rows.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use lakeflow_shared::errors::LakeflowResult;

use super::{Database, db_err, timestamp_column};
use crate::models::{SubtaskDescriptor, SubtaskRecord, TaskId};

const SUBTASK_COLUMNS: &str = "id, task_id, name, number, is_collector, began_at, finished_at, \
     spent_seconds, is_failed, message, finished_records";

#[derive(Clone)]
pub struct SubtaskStore {
    db: Database,
}

impl SubtaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert missing descriptor rows; existing rows keep their timing and outcome.
    pub fn upsert_descriptors(
        &self,
        task_id: TaskId,
        descriptors: &[SubtaskDescriptor],
    ) -> LakeflowResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        for d in descriptors {
            db_err!(tx.execute(
                "INSERT INTO subtasks (task_id, name, number, is_collector) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(task_id, name) DO UPDATE SET number = excluded.number, \
                 is_collector = excluded.is_collector",
                params![task_id, d.name, d.number, d.is_collector],
            ))?;
        }
        db_err!(tx.commit())
    }

    /// Replace every descriptor row of a task with fresh, never-run rows.
    pub fn reset_descriptors(
        &self,
        task_id: TaskId,
        descriptors: &[SubtaskDescriptor],
    ) -> LakeflowResult<()> {
        let mut conn = self.db.conn();
        let tx = db_err!(conn.transaction())?;
        db_err!(tx.execute("DELETE FROM subtasks WHERE task_id = ?1", params![task_id]))?;
        for d in descriptors {
            db_err!(tx.execute(
                "INSERT INTO subtasks (task_id, name, number, is_collector) VALUES (?1, ?2, ?3, ?4)",
                params![task_id, d.name, d.number, d.is_collector],
            ))?;
        }
        db_err!(tx.commit())
    }

    pub fn get(&self, task_id: TaskId, name: &str) -> LakeflowResult<Option<SubtaskRecord>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                &format!("SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ?1 AND name = ?2"),
                params![task_id, name],
                row_to_subtask,
            )
            .optional()
        )
    }

    pub fn list(&self, task_id: TaskId) -> LakeflowResult<Vec<SubtaskRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(&format!(
            "SELECT {SUBTASK_COLUMNS} FROM subtasks WHERE task_id = ?1 ORDER BY id"
        )))?;
        let rows = db_err!(stmt.query_map(params![task_id], row_to_subtask))?;
        db_err!(rows.collect::<Result<Vec<_>, _>>())
    }

    /// Whether a previous run already finished this subtask without failure.
    pub fn finished_successfully(&self, task_id: TaskId, name: &str) -> LakeflowResult<bool> {
        Ok(self
            .get(task_id, name)?
            .is_some_and(|r| r.finished_at.is_some() && !r.is_failed))
    }

    pub fn mark_started(
        &self,
        task_id: TaskId,
        name: &str,
        began_at: DateTime<Utc>,
    ) -> LakeflowResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "UPDATE subtasks SET began_at = ?3, finished_at = NULL, spent_seconds = NULL, \
             is_failed = 0, message = '', finished_records = 0 WHERE task_id = ?1 AND name = ?2",
            params![task_id, name, began_at.to_rfc3339()],
        ))?;
        Ok(())
    }

    /// Record the outcome of a run. `failure` carries the error message when it failed.
    pub fn mark_finished(
        &self,
        task_id: TaskId,
        name: &str,
        finished_at: DateTime<Utc>,
        spent_seconds: i64,
        failure: Option<&str>,
    ) -> LakeflowResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "UPDATE subtasks SET finished_at = ?3, spent_seconds = ?4, is_failed = ?5, \
             message = ?6 WHERE task_id = ?1 AND name = ?2",
            params![
                task_id,
                name,
                finished_at.to_rfc3339(),
                spent_seconds,
                failure.is_some(),
                failure.unwrap_or_default(),
            ],
        ))?;
        Ok(())
    }

    pub fn update_finished_records(
        &self,
        task_id: TaskId,
        name: &str,
        finished_records: u64,
    ) -> LakeflowResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "UPDATE subtasks SET finished_records = ?3 WHERE task_id = ?1 AND name = ?2",
            params![task_id, name, finished_records as i64],
        ))?;
        Ok(())
    }
}

fn row_to_subtask(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubtaskRecord> {
    Ok(SubtaskRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        name: row.get(2)?,
        number: row.get(3)?,
        is_collector: row.get(4)?,
        began_at: timestamp_column(row, 5)?,
        finished_at: timestamp_column(row, 6)?,
        spent_seconds: row.get(7)?,
        is_failed: row.get(8)?,
        message: row.get(9)?,
        finished_records: row.get(10)?,
    })
}
