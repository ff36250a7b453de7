mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use common::{test_options, test_runtime};
use lakeflow::{
    LakeflowError, LakeflowOptions, LakeflowRuntime, MigrationScript, Plugin, PluginHandle,
    PluginMigration,
};

struct Webhook;

impl Plugin for Webhook {
    fn name(&self) -> &str {
        "webhook"
    }

    fn description(&self) -> &str {
        "Receives deployments and incidents pushed by external tools"
    }

    fn as_migration(&self) -> Option<&dyn PluginMigration> {
        Some(self)
    }
}

impl PluginMigration for Webhook {
    fn migration_scripts(&self) -> Vec<MigrationScript> {
        vec![
            MigrationScript::new(
                1,
                "create_webhook_connections",
                "CREATE TABLE webhook_connections (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
            ),
            MigrationScript::new(
                2,
                "add_webhook_token",
                "ALTER TABLE webhook_connections ADD COLUMN token TEXT;",
            ),
        ]
    }
}

fn create_webhook() -> PluginHandle {
    Arc::new(Webhook)
}

lakeflow::register_builtin_plugin!("webhook", create_webhook);

#[tokio::test]
async fn test_builtin_plugin_is_registered_at_startup() {
    let dir = TempDir::new().unwrap();
    let runtime = test_runtime(&dir).await;

    let plugin = runtime.registry().get("webhook").unwrap();
    assert!(plugin.description().starts_with("Receives deployments"));
    assert!(runtime.pending_migrations().unwrap().is_empty());

    let err = runtime
        .test_connection("webhook", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, LakeflowError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_plugin_migrations_follow_framework() {
    let dir = TempDir::new().unwrap();
    let runtime = LakeflowRuntime::new(LakeflowOptions {
        auto_migrate: false,
        ..test_options(&dir)
    })
    .await
    .unwrap();

    let pending = runtime.pending_migrations().unwrap();
    let components: Vec<&str> = pending.iter().map(|m| m.component.as_str()).collect();
    let first_webhook = components.iter().position(|c| *c == "webhook").unwrap();
    assert!(components[..first_webhook].iter().all(|c| *c == "framework"));
    assert_eq!(
        pending[first_webhook..]
            .iter()
            .map(|m| m.version)
            .collect::<Vec<_>>(),
        vec![1, 2]
    );

    assert_eq!(runtime.migrate().unwrap(), pending.len());
    assert!(runtime.pending_migrations().unwrap().is_empty());

    // A second runtime on the same home finds nothing left to apply.
    drop(runtime);
    let reopened = LakeflowRuntime::new(LakeflowOptions {
        auto_migrate: false,
        ..test_options(&dir)
    })
    .await
    .unwrap();
    assert!(reopened.pending_migrations().unwrap().is_empty());
}

#[tokio::test]
async fn test_migrator_is_initialized_once() {
    let dir = TempDir::new().unwrap();
    let runtime = test_runtime(&dir).await;
    let err = runtime.migrator().init(runtime.db().clone()).unwrap_err();
    assert!(matches!(err, LakeflowError::AlreadyInitialized(_)));
}
