//! Plugin-owned subtask state markers.

use rusqlite::{OptionalExtension, params};

use lakeflow_shared::errors::LakeflowResult;

use super::{Database, db_err, json_column, now_text, timestamp_column, timestamp_text};
use crate::models::SubtaskState;

/// Upsert-by-key / query-by-key storage for [`SubtaskState`].
#[derive(Clone)]
pub struct SubtaskStateStore {
    db: Database,
}

impl SubtaskStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(
        &self,
        plugin: &str,
        subtask: &str,
        params: &str,
    ) -> LakeflowResult<Option<SubtaskState>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                "SELECT plugin, subtask, params, prev_config, prev_time_after, prev_started_at \
                 FROM subtask_states WHERE plugin = ?1 AND subtask = ?2 AND params = ?3",
                params![plugin, subtask, params],
                |row| {
                    Ok(SubtaskState {
                        plugin: row.get(0)?,
                        subtask: row.get(1)?,
                        params: row.get(2)?,
                        prev_config: json_column(row, 3)?,
                        prev_time_after: timestamp_column(row, 4)?,
                        prev_started_at: timestamp_column(row, 5)?,
                    })
                },
            )
            .optional()
        )
    }

    pub fn upsert(&self, state: &SubtaskState) -> LakeflowResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO subtask_states \
             (plugin, subtask, params, prev_config, prev_time_after, prev_started_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(plugin, subtask, params) DO UPDATE SET \
             prev_config = excluded.prev_config, prev_time_after = excluded.prev_time_after, \
             prev_started_at = excluded.prev_started_at, updated_at = excluded.updated_at",
            params![
                state.plugin,
                state.subtask,
                state.params,
                serde_json::to_string(&state.prev_config)?,
                timestamp_text(state.prev_time_after),
                timestamp_text(state.prev_started_at),
                now_text(),
            ],
        ))?;
        Ok(())
    }
}
