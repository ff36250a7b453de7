//! Ordered, component-tagged schema migrations.
//!
//! The migrator is bound to exactly one database (`init` succeeds once). Scripts are
//! applied in registration order: the framework registers first, then every plugin
//! exposing migrations in registry order. Each script runs in its own transaction
//! together with its `migration_history` row, so a failed script leaves no trace.

use parking_lot::Mutex;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use crate::db::{Database, db_err, now_text};

/// One named schema step owned by a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScript {
    pub version: u64,
    pub name: String,
    pub sql: String,
}

impl MigrationScript {
    pub fn new(version: u64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// A registered script not yet recorded in the history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMigration {
    pub component: String,
    pub version: u64,
    pub name: String,
}

#[derive(Default)]
struct MigratorState {
    db: Option<Database>,
    scripts: Vec<(String, MigrationScript)>,
}

#[derive(Default)]
pub struct Migrator {
    state: Mutex<MigratorState>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the migrator to a database. A second call fails.
    pub fn init(&self, db: Database) -> LakeflowResult<()> {
        let mut state = self.state.lock();
        if state.db.is_some() {
            return Err(LakeflowError::AlreadyInitialized("migrator".to_string()));
        }
        state.db = Some(db);
        Ok(())
    }

    /// Queue `scripts` under `component`, after everything registered before.
    pub fn register(
        &self,
        component: &str,
        scripts: impl IntoIterator<Item = MigrationScript>,
    ) -> LakeflowResult<()> {
        let mut state = self.state.lock();
        if state.db.is_none() {
            return Err(LakeflowError::InvalidState(
                "migrator is not initialized".to_string(),
            ));
        }

        for script in scripts {
            let duplicate = state
                .scripts
                .iter()
                .any(|(c, s)| c == component && s.version == script.version);
            if duplicate {
                return Err(LakeflowError::InvalidArgument(format!(
                    "migration {component}/{} is registered twice",
                    script.version
                )));
            }
            state.scripts.push((component.to_string(), script));
        }
        Ok(())
    }

    /// Registered scripts that have not been applied yet, in apply order.
    pub fn pending(&self) -> LakeflowResult<Vec<PendingMigration>> {
        let (db, scripts) = self.snapshot()?;
        let mut pending = Vec::new();
        for (component, script) in &scripts {
            if !is_applied(&db, component, script.version)? {
                pending.push(PendingMigration {
                    component: component.clone(),
                    version: script.version,
                    name: script.name.clone(),
                });
            }
        }
        Ok(pending)
    }

    /// Apply pending scripts in registration order. Returns how many ran.
    pub fn execute(&self) -> LakeflowResult<usize> {
        let (db, scripts) = self.snapshot()?;
        let mut applied = 0;

        for (component, script) in &scripts {
            if is_applied(&db, component, script.version)? {
                continue;
            }

            let mut conn = db.conn();
            let tx = db_err!(conn.transaction())?;
            tx.execute_batch(&script.sql).map_err(|e| {
                LakeflowError::Database(format!(
                    "migration {component}/{} ({}) failed: {e}",
                    script.version, script.name
                ))
            })?;
            db_err!(tx.execute(
                "INSERT INTO migration_history (component, version, name, applied_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![component, script.version as i64, script.name, now_text()],
            ))?;
            db_err!(tx.commit())?;

            tracing::info!(
                component = %component,
                version = script.version,
                name = %script.name,
                "Applied migration"
            );
            applied += 1;
        }

        if applied == 0 {
            tracing::debug!("No pending migrations");
        }
        Ok(applied)
    }

    fn snapshot(&self) -> LakeflowResult<(Database, Vec<(String, MigrationScript)>)> {
        let state = self.state.lock();
        let db = state.db.clone().ok_or_else(|| {
            LakeflowError::InvalidState("migrator is not initialized".to_string())
        })?;
        Ok((db, state.scripts.clone()))
    }
}

fn is_applied(db: &Database, component: &str, version: u64) -> LakeflowResult<bool> {
    let conn = db.conn();
    let count: i64 = db_err!(conn.query_row(
        "SELECT COUNT(*) FROM migration_history WHERE component = ?1 AND version = ?2",
        params![component, version as i64],
        |row| row.get(0),
    ))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{FRAMEWORK_COMPONENT, framework_migrations};
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> Database {
        Database::open(&dir.path().join("lakeflow.db")).unwrap()
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let migrator = Migrator::new();

        migrator.init(db.clone()).unwrap();
        let err = migrator.init(db).unwrap_err();
        assert!(matches!(err, LakeflowError::AlreadyInitialized(ref what) if what == "migrator"));
    }

    #[test]
    fn test_register_before_init_fails() {
        let migrator = Migrator::new();
        assert!(matches!(
            migrator.register("framework", framework_migrations()),
            Err(LakeflowError::InvalidState(_))
        ));
        assert!(migrator.execute().is_err());
    }

    #[test]
    fn test_execute_applies_in_registration_order_once() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        let migrator = Migrator::new();
        migrator.init(db.clone()).unwrap();
        migrator
            .register(FRAMEWORK_COMPONENT, framework_migrations())
            .unwrap();
        migrator
            .register(
                "jira",
                [MigrationScript::new(
                    1,
                    "create_jira_issues",
                    "CREATE TABLE _tool_jira_issues (id INTEGER PRIMARY KEY);",
                )],
            )
            .unwrap();

        let pending: Vec<_> = migrator
            .pending()
            .unwrap()
            .into_iter()
            .map(|p| (p.component, p.version))
            .collect();
        assert_eq!(
            pending,
            vec![
                ("framework".to_string(), 1),
                ("framework".to_string(), 2),
                ("framework".to_string(), 3),
                ("jira".to_string(), 1),
            ]
        );

        assert_eq!(migrator.execute().unwrap(), 4);
        assert_eq!(migrator.execute().unwrap(), 0);
        assert!(migrator.pending().unwrap().is_empty());

        let order: Vec<String> = db
            .conn()
            .prepare("SELECT component || '/' || version FROM migration_history ORDER BY rowid")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(order, ["framework/1", "framework/2", "framework/3", "jira/1"]);
    }

    #[test]
    fn test_failed_script_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let migrator = Migrator::new();
        migrator.init(open_db(&dir)).unwrap();
        migrator
            .register("broken", [MigrationScript::new(1, "bad", "CREATE TABLE (;")])
            .unwrap();

        assert!(matches!(migrator.execute(), Err(LakeflowError::Database(_))));
        assert_eq!(migrator.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let dir = TempDir::new().unwrap();
        let migrator = Migrator::new();
        migrator.init(open_db(&dir)).unwrap();
        let script = MigrationScript::new(1, "a", "SELECT 1;");
        assert!(migrator
            .register("p", [script.clone(), script])
            .is_err());
    }
}
