//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use lakeflow::{
    LakeflowError, LakeflowOptions, LakeflowResult, LakeflowRuntime, NewPipeline, Plugin,
    PluginClose, PluginHandle, PluginTask, PipelineTaskSpec, SubtaskMeta, SyncPolicy, Task,
    TaskContext, TaskId, TaskStatus,
};

/// What a scripted subtask does when it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail,
    Panic,
    WaitForCancel,
}

/// Ordered log of `plugin:subtask` executions, shared between plugins.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Task plugin whose subtasks follow a script that tests can change between runs.
#[derive(Clone)]
pub struct ScriptedPlugin {
    name: String,
    subtasks: Vec<String>,
    steps: Arc<Mutex<HashMap<String, Step>>>,
    force_run: Arc<Mutex<HashSet<String>>>,
    closeable: bool,
    closes: Arc<AtomicUsize>,
    calls: CallLog,
}

impl ScriptedPlugin {
    pub fn new(name: &str, subtasks: &[&str], calls: CallLog) -> Self {
        Self {
            name: name.to_string(),
            subtasks: subtasks.iter().map(|s| s.to_string()).collect(),
            steps: Arc::new(Mutex::new(HashMap::new())),
            force_run: Arc::new(Mutex::new(HashSet::new())),
            closeable: false,
            closes: Arc::new(AtomicUsize::new(0)),
            calls,
        }
    }

    /// Expose the close capability and count its calls.
    pub fn closeable(mut self) -> Self {
        self.closeable = true;
        self
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn force_run_on_resume(&self, subtask: &str) {
        self.force_run.lock().insert(subtask.to_string());
    }

    pub fn set_step(&self, subtask: &str, step: Step) {
        self.steps.lock().insert(subtask.to_string(), step);
    }

    pub fn handle(&self) -> PluginHandle {
        Arc::new(self.clone())
    }
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_task(&self) -> Option<&dyn PluginTask> {
        Some(self)
    }

    fn as_closeable(&self) -> Option<&dyn PluginClose> {
        self.closeable.then_some(self as &dyn PluginClose)
    }
}

#[async_trait]
impl PluginClose for ScriptedPlugin {
    async fn close(&self, _ctx: &TaskContext) -> LakeflowResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PluginTask for ScriptedPlugin {
    fn subtask_metas(&self) -> Vec<SubtaskMeta> {
        let force_run = self.force_run.lock().clone();
        self.subtasks
            .iter()
            .map(|subtask| {
                let plugin = self.name.clone();
                let steps = self.steps.clone();
                let calls = self.calls.clone();
                let meta = SubtaskMeta::new(subtask.clone(), move |ctx| {
                    let step = steps
                        .lock()
                        .get(ctx.name())
                        .copied()
                        .unwrap_or(Step::Succeed);
                    calls.lock().push(format!("{plugin}:{}", ctx.name()));
                    async move {
                        match step {
                            Step::Succeed => {
                                ctx.set_total_records(10);
                                ctx.advance_records(4);
                                ctx.advance_records(6);
                                Ok(())
                            }
                            Step::Fail => Err(LakeflowError::Plugin(format!(
                                "{} could not reach the server",
                                ctx.name()
                            ))),
                            Step::Panic => panic!("{} hit an impossible state", ctx.name()),
                            Step::WaitForCancel => {
                                ctx.cancel_token().cancelled().await;
                                Err(LakeflowError::Cancelled)
                            }
                        }
                    }
                });
                if force_run.contains(subtask) {
                    meta.force_run_on_resume()
                } else {
                    meta
                }
            })
            .collect()
    }
}

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn test_options(dir: &TempDir) -> LakeflowOptions {
    LakeflowOptions {
        init_logging: false,
        ..LakeflowOptions::with_home(dir.path().join("home"))
    }
}

pub async fn test_runtime(dir: &TempDir) -> LakeflowRuntime {
    LakeflowRuntime::new(test_options(dir)).await.unwrap()
}

/// Pipeline whose rows hold one task per plugin name.
pub fn plan_of(rows: &[&[&str]], sync_policy: SyncPolicy) -> NewPipeline {
    NewPipeline {
        name: "test-pipeline".to_string(),
        plan: rows
            .iter()
            .map(|row| row.iter().map(|p| PipelineTaskSpec::new(*p)).collect())
            .collect(),
        sync_policy,
        ..Default::default()
    }
}

pub fn task_at(tasks: &[Task], row: i64, plugin: &str) -> TaskId {
    tasks
        .iter()
        .find(|t| t.pipeline_row == row && t.plugin == plugin)
        .map(|t| t.id)
        .unwrap()
}

/// Poll until the task reaches `status`.
pub async fn wait_for_status(runtime: &LakeflowRuntime, task_id: TaskId, status: TaskStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while runtime.get_task(task_id).unwrap().status != status {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
