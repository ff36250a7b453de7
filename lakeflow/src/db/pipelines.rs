//! Pipeline persistence.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::{
    Database, db_err, json_column, now_text, parsed_column, required_timestamp_column,
    timestamp_column, timestamp_text,
};
use crate::models::{
    NewPipeline, Pipeline, PipelineId, PipelineStatus, SyncPolicy, TaskStatus,
};

const PIPELINE_COLUMNS: &str = "id, name, blueprint_id, plan, total_tasks, finished_tasks, status, \
     message, error_name, stage, began_at, finished_at, spent_seconds, skip_on_fail, time_after, \
     skip_collectors, full_sync, created_at";

/// Terminal outcome written by the pipeline runner.
#[derive(Debug, Clone)]
pub struct PipelineFinish {
    pub status: PipelineStatus,
    pub message: String,
    pub error_name: String,
    pub finished_at: DateTime<Utc>,
    pub spent_seconds: i64,
}

/// Pipeline rows plus the task grid created with them.
#[derive(Clone)]
pub struct PipelineStore {
    db: Database,
}

impl PipelineStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a pipeline and one CREATED task per plan cell, atomically.
    ///
    /// Rows are 1-indexed in plan order, columns 0-indexed within a row.
    pub fn create(&self, new: &NewPipeline) -> LakeflowResult<Pipeline> {
        let plan = serde_json::to_string(&new.plan)?;
        let total_tasks: usize = new.plan.iter().map(Vec::len).sum();
        let policy = &new.sync_policy;

        let id = {
            let mut conn = self.db.conn();
            let tx = db_err!(conn.transaction())?;
            let now = now_text();

            db_err!(tx.execute(
                "INSERT INTO pipelines (name, blueprint_id, plan, total_tasks, status, \
                 skip_on_fail, time_after, skip_collectors, full_sync, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    new.name,
                    new.blueprint_id,
                    plan,
                    total_tasks as i64,
                    PipelineStatus::Created.as_str(),
                    policy.skip_on_fail,
                    timestamp_text(policy.time_after),
                    policy.skip_collectors,
                    policy.full_sync,
                    now,
                ],
            ))?;
            let pipeline_id = tx.last_insert_rowid();

            for (row, stage) in new.plan.iter().enumerate() {
                for (col, spec) in stage.iter().enumerate() {
                    db_err!(tx.execute(
                        "INSERT INTO tasks (pipeline_id, pipeline_row, pipeline_col, plugin, \
                         subtasks, options, status, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                        params![
                            pipeline_id,
                            row as i64 + 1,
                            col as i64,
                            spec.plugin,
                            serde_json::to_string(&spec.subtasks)?,
                            serde_json::to_string(&spec.options)?,
                            TaskStatus::Created.as_str(),
                            now,
                        ],
                    ))?;
                }
            }

            db_err!(tx.commit())?;
            pipeline_id
        };

        tracing::debug!(pipeline_id = id, total_tasks, "Created pipeline");
        self.get(id)
    }

    pub fn get(&self, id: PipelineId) -> LakeflowResult<Pipeline> {
        let conn = self.db.conn();
        let pipeline = db_err!(
            conn.query_row(
                &format!("SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = ?1"),
                params![id],
                row_to_pipeline,
            )
            .optional()
        )?;
        pipeline.ok_or_else(|| LakeflowError::NotFound(format!("pipeline {id}")))
    }

    /// Mark a stage as started. `began_at` is only stamped on the first stage.
    pub fn mark_running(
        &self,
        id: PipelineId,
        stage: i64,
        began_at: DateTime<Utc>,
    ) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE pipelines SET status = ?2, stage = ?3, began_at = COALESCE(began_at, ?4), \
             updated_at = ?5 WHERE id = ?1",
            params![
                id,
                PipelineStatus::Running.as_str(),
                stage,
                began_at.to_rfc3339(),
                now_text(),
            ],
        ))?;
        ensure_updated(updated, id)
    }

    pub fn finish(&self, id: PipelineId, finish: &PipelineFinish) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE pipelines SET status = ?2, message = ?3, error_name = ?4, finished_at = ?5, \
             spent_seconds = ?6, updated_at = ?7 WHERE id = ?1",
            params![
                id,
                finish.status.as_str(),
                finish.message,
                finish.error_name,
                finish.finished_at.to_rfc3339(),
                finish.spent_seconds,
                now_text(),
            ],
        ))?;
        ensure_updated(updated, id)
    }

    pub fn set_status(&self, id: PipelineId, status: PipelineStatus) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE pipelines SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_text()],
        ))?;
        ensure_updated(updated, id)
    }

    /// Count one more finalized task. Called exactly once per task run.
    pub fn increment_finished_tasks(&self, id: PipelineId) -> LakeflowResult<()> {
        let conn = self.db.conn();
        let updated = db_err!(conn.execute(
            "UPDATE pipelines SET finished_tasks = finished_tasks + 1, updated_at = ?2 \
             WHERE id = ?1",
            params![id, now_text()],
        ))?;
        ensure_updated(updated, id)
    }
}

fn ensure_updated(updated: usize, id: PipelineId) -> LakeflowResult<()> {
    if updated == 0 {
        return Err(LakeflowError::NotFound(format!("pipeline {id}")));
    }
    Ok(())
}

fn row_to_pipeline(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        name: row.get(1)?,
        blueprint_id: row.get(2)?,
        plan: json_column(row, 3)?,
        total_tasks: row.get(4)?,
        finished_tasks: row.get(5)?,
        status: parsed_column(row, 6)?,
        message: row.get(7)?,
        error_name: row.get(8)?,
        stage: row.get(9)?,
        began_at: timestamp_column(row, 10)?,
        finished_at: timestamp_column(row, 11)?,
        spent_seconds: row.get(12)?,
        sync_policy: SyncPolicy {
            skip_on_fail: row.get(13)?,
            time_after: timestamp_column(row, 14)?,
            skip_collectors: row.get(15)?,
            full_sync: row.get(16)?,
        },
        created_at: required_timestamp_column(row, 17)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_db;
    use crate::models::PipelineTaskSpec;
    use tempfile::TempDir;

    fn two_stage_plan() -> NewPipeline {
        NewPipeline {
            name: "nightly".into(),
            blueprint_id: Some(7),
            plan: vec![
                vec![PipelineTaskSpec::new("gitextractor"), PipelineTaskSpec::new("jira")],
                vec![PipelineTaskSpec::new("dora")],
            ],
            sync_policy: SyncPolicy {
                skip_on_fail: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_create_persists_plan_and_grid() {
        let dir = TempDir::new().unwrap();
        let db = migrated_db(dir.path());
        let store = PipelineStore::new(db.clone());

        let pipeline = store.create(&two_stage_plan()).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Created);
        assert_eq!(pipeline.total_tasks, 3);
        assert_eq!(pipeline.finished_tasks, 0);
        assert_eq!(pipeline.plan.len(), 2);
        assert!(pipeline.sync_policy.skip_on_fail);
        assert_eq!(pipeline.blueprint_id, Some(7));

        let rows: Vec<(i64, i64, String)> = db
            .conn()
            .prepare("SELECT pipeline_row, pipeline_col, plugin FROM tasks ORDER BY id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (1, 0, "gitextractor".to_string()),
                (1, 1, "jira".to_string()),
                (2, 0, "dora".to_string()),
            ]
        );
    }

    #[test]
    fn test_mark_running_keeps_first_began_at() {
        let dir = TempDir::new().unwrap();
        let store = PipelineStore::new(migrated_db(dir.path()));
        let id = store.create(&two_stage_plan()).unwrap().id;

        let first = Utc::now() - chrono::Duration::seconds(30);
        store.mark_running(id, 1, first).unwrap();
        store.mark_running(id, 2, Utc::now()).unwrap();

        let pipeline = store.get(id).unwrap();
        assert_eq!(pipeline.status, PipelineStatus::Running);
        assert_eq!(pipeline.stage, 2);
        assert_eq!(pipeline.began_at.unwrap().timestamp(), first.timestamp());
    }

    #[test]
    fn test_missing_pipeline_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = PipelineStore::new(migrated_db(dir.path()));
        assert!(matches!(store.get(42), Err(LakeflowError::NotFound(_))));
        assert!(matches!(
            store.increment_finished_tasks(42),
            Err(LakeflowError::NotFound(_))
        ));
    }
}
