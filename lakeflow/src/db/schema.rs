//! Framework-owned schema.
//!
//! Only the migration history table is created on open. Everything else is a
//! framework migration applied by the [`Migrator`](crate::migration::Migrator)
//! before any plugin's scripts.

use crate::migration::MigrationScript;

/// Component label of the framework's own migrations.
pub const FRAMEWORK_COMPONENT: &str = "framework";

pub(crate) const MIGRATION_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS migration_history (
    component TEXT NOT NULL,
    version INTEGER NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (component, version)
);
"#;

const PIPELINES_AND_TASKS: &str = r#"
CREATE TABLE pipelines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    blueprint_id INTEGER,
    plan TEXT NOT NULL,
    total_tasks INTEGER NOT NULL DEFAULT 0,
    finished_tasks INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    error_name TEXT NOT NULL DEFAULT '',
    stage INTEGER NOT NULL DEFAULT 0,
    began_at TEXT,
    finished_at TEXT,
    spent_seconds INTEGER,
    skip_on_fail INTEGER NOT NULL DEFAULT 0,
    time_after TEXT,
    skip_collectors INTEGER NOT NULL DEFAULT 0,
    full_sync INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_pipelines_status ON pipelines(status);

CREATE TABLE tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pipeline_id INTEGER NOT NULL REFERENCES pipelines(id),
    pipeline_row INTEGER NOT NULL,
    pipeline_col INTEGER NOT NULL,
    plugin TEXT NOT NULL,
    subtasks TEXT NOT NULL DEFAULT '[]',
    options TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    error_name TEXT NOT NULL DEFAULT '',
    progress REAL NOT NULL DEFAULT 0,
    failed_sub_task TEXT,
    began_at TEXT,
    finished_at TEXT,
    spent_seconds INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_tasks_grid ON tasks(pipeline_id, pipeline_row, pipeline_col);
"#;

const SUBTASKS: &str = r#"
CREATE TABLE subtasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    name TEXT NOT NULL,
    number INTEGER NOT NULL,
    is_collector INTEGER NOT NULL DEFAULT 0,
    began_at TEXT,
    finished_at TEXT,
    spent_seconds INTEGER,
    is_failed INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    finished_records INTEGER NOT NULL DEFAULT 0,
    UNIQUE (task_id, name)
);
"#;

const SUBTASK_STATES: &str = r#"
CREATE TABLE subtask_states (
    plugin TEXT NOT NULL,
    subtask TEXT NOT NULL,
    params TEXT NOT NULL,
    prev_config TEXT NOT NULL DEFAULT 'null',
    prev_time_after TEXT,
    prev_started_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (plugin, subtask, params)
);
"#;

/// Framework migrations, in apply order.
pub fn framework_migrations() -> Vec<MigrationScript> {
    vec![
        MigrationScript::new(1, "create_pipelines_and_tasks", PIPELINES_AND_TASKS),
        MigrationScript::new(2, "create_subtasks", SUBTASKS),
        MigrationScript::new(3, "create_subtask_states", SUBTASK_STATES),
    ]
}
