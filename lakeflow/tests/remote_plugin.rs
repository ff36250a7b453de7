#![cfg(unix)]

mod common;

use std::path::Path;

use serde_json::{Value, json};
use tempfile::TempDir;

use common::test_options;
use lakeflow::{
    LakeflowError, LakeflowOptions, LakeflowRuntime, NewPipeline, PipelineTaskSpec, TaskStatus,
};

const GIT_EXTRACTOR: &str = r#"#!/bin/sh
case "$1" in
plugin-info)
  echo '{"type":"result","data":{"name":"gitextractor","description":"Extracts commits from git repositories","capabilities":["task","test-connection"],"subtasks":[{"name":"Clone Git Repo"},{"name":"extractCommits"},{"name":"extractTags","enabled_by_default":false}],"migrations":[{"version":1,"name":"create_git_commits","sql":"CREATE TABLE git_commits (sha TEXT PRIMARY KEY);"}]}}'
  ;;
run-subtask)
  read -r ctx
  printf '%s\n' "$ctx" >> "$(dirname "$0")/calls.jsonl"
  echo '{"type":"log","level":"info","message":"working"}'
  echo '{"type":"progress","current":4,"total":10}'
  echo '{"type":"progress","current":10,"total":10}'
  echo '{"type":"result","data":null}'
  ;;
test-connection)
  read -r ctx
  case "$ctx" in
  *bad-token*) echo '{"type":"error","name":"Auth","message":"token rejected"}' ;;
  *) echo '{"type":"result","data":{"ok":true}}' ;;
  esac
  ;;
*)
  echo "unknown command $1" >&2
  exit 2
  ;;
esac
"#;

const FAILING_COLLECTOR: &str = r#"#!/bin/sh
case "$1" in
plugin-info)
  echo '{"type":"result","data":{"name":"sonarqube","capabilities":["task"],"subtasks":[{"name":"collectIssues"}]}}'
  ;;
run-subtask)
  echo '{"type":"error","name":"Http","message":"sonarqube returned 502"}'
  ;;
esac
"#;

fn write_plugin(root: &Path, dir: &str, script: &str) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("run.sh"), script).unwrap();
}

fn remote_options(dir: &TempDir, remote: &Path) -> LakeflowOptions {
    LakeflowOptions {
        remote_plugin_dir: Some(remote.to_path_buf()),
        ..test_options(dir)
    }
}

#[tokio::test]
async fn test_remote_plugin_runs_subtasks() {
    let dir = TempDir::new().unwrap();
    let remote = dir.path().join("remote");
    write_plugin(&remote, "git", GIT_EXTRACTOR);

    let runtime = LakeflowRuntime::new(remote_options(&dir, &remote))
        .await
        .unwrap();
    let plugin = runtime.registry().get("gitextractor").unwrap();
    assert_eq!(plugin.description(), "Extracts commits from git repositories");
    assert!(runtime.pending_migrations().unwrap().is_empty());

    let pipeline = runtime
        .create_pipeline(&NewPipeline {
            name: "git".to_string(),
            plan: vec![vec![
                PipelineTaskSpec::new("gitextractor")
                    .with_options(json!({"url": "https://example.com/repo.git"})),
            ]],
            ..Default::default()
        })
        .unwrap();
    let task_id = runtime.list_tasks(pipeline.id).unwrap()[0].id;
    runtime.run_task(task_id).await.unwrap();

    assert_eq!(
        runtime.get_task(task_id).unwrap().status,
        TaskStatus::Completed
    );

    let calls: Vec<Value> = std::fs::read_to_string(remote.join("git").join("calls.jsonl"))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["subtask"], "Clone Git Repo");
    assert_eq!(calls[0]["number"], 1);
    assert_eq!(calls[1]["subtask"], "extractCommits");
    assert_eq!(calls[1]["number"], 2);
    assert_eq!(calls[1]["task_id"], task_id);
    assert_eq!(calls[1]["task_data"]["url"], "https://example.com/repo.git");

    let subtasks = runtime.list_subtasks(task_id).unwrap();
    let clone = subtasks.iter().find(|s| s.name == "Clone Git Repo").unwrap();
    assert!(clone.is_collector);
    assert_eq!(clone.finished_records, 10);
    let tags = subtasks.iter().find(|s| s.name == "extractTags").unwrap();
    assert!(tags.began_at.is_none());
}

#[tokio::test]
async fn test_remote_connection_test() {
    let dir = TempDir::new().unwrap();
    let remote = dir.path().join("remote");
    write_plugin(&remote, "git", GIT_EXTRACTOR);
    let runtime = LakeflowRuntime::new(remote_options(&dir, &remote))
        .await
        .unwrap();

    runtime
        .test_connection("gitextractor", &json!({"token": "good"}))
        .await
        .unwrap();

    let err = runtime
        .test_connection("gitextractor", &json!({"token": "bad-token"}))
        .await
        .unwrap_err();
    assert!(
        matches!(err, LakeflowError::Remote { ref command, ref message, .. }
            if command == "test-connection" && message.contains("token rejected"))
    );
}

#[tokio::test]
async fn test_remote_subtask_error_fails_task() {
    let dir = TempDir::new().unwrap();
    let remote = dir.path().join("remote");
    write_plugin(&remote, "sonar", FAILING_COLLECTOR);
    let runtime = LakeflowRuntime::new(remote_options(&dir, &remote))
        .await
        .unwrap();

    let pipeline = runtime
        .create_pipeline(&NewPipeline {
            name: "sonar".to_string(),
            plan: vec![vec![PipelineTaskSpec::new("sonarqube")]],
            ..Default::default()
        })
        .unwrap();
    let task_id = runtime.list_tasks(pipeline.id).unwrap()[0].id;
    runtime.run_task(task_id).await.unwrap_err();

    let task = runtime.get_task(task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_name, "Remote");
    assert_eq!(task.failed_sub_task.as_deref(), Some("collectIssues"));
    assert!(task.message.contains("sonarqube returned 502"));
}

#[tokio::test]
async fn test_bad_remote_plugin_aborts_startup() {
    let dir = TempDir::new().unwrap();
    let remote = dir.path().join("remote");
    write_plugin(&remote, "git", GIT_EXTRACTOR);
    write_plugin(&remote, "broken", "echo 'this is not json'\n");

    let err = LakeflowRuntime::new(remote_options(&dir, &remote))
        .await
        .unwrap_err();
    assert!(matches!(err, LakeflowError::Remote { .. }));
}

#[tokio::test]
async fn test_duplicate_remote_names_abort_startup() {
    let dir = TempDir::new().unwrap();
    let remote = dir.path().join("remote");
    write_plugin(&remote, "git-a", GIT_EXTRACTOR);
    write_plugin(&remote, "git-b", GIT_EXTRACTOR);

    let err = LakeflowRuntime::new(remote_options(&dir, &remote))
        .await
        .unwrap_err();
    assert!(matches!(err, LakeflowError::DuplicatePlugin(name) if name == "gitextractor"));
}
