//! Task progress reporting.
//!
//! Subtasks emit [`ProgressEvent`]s over an unbounded channel. One aggregator per
//! running task consumes them in order, keeps a [`ProgressDetail`] on the shared
//! [`ProgressBoard`] and persists:
//! - the task's progress fraction on every finished subtask
//! - the current subtask's record count, throttled by [`should_flush_records`]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::db::{SubtaskStore, TaskStore};
use crate::models::TaskId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    SetTotalSubtasks(usize),
    AdvanceSubtask,
    SetCurrentSubtask { name: String, number: usize },
    SetTotalRecords(u64),
    AdvanceRecords(u64),
}

/// Live progress of one running task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressDetail {
    pub total_subtasks: usize,
    pub finished_subtasks: usize,
    pub subtask_name: String,
    pub subtask_number: usize,
    pub total_records: u64,
    pub finished_records: u64,
}

impl ProgressDetail {
    /// Fraction of enabled subtasks finished.
    pub fn fraction(&self) -> f64 {
        if self.total_subtasks == 0 {
            return 0.0;
        }
        (self.finished_subtasks as f64 / self.total_subtasks as f64).min(1.0)
    }
}

/// Whether the record count moved enough since the last write to persist it again.
///
/// With a declared `total`, the delta must reach 1% of it (inclusive: exactly 1%
/// flushes); without one any positive delta qualifies.
pub fn should_flush_records(finished: u64, last_flushed: u64, total: u64) -> bool {
    let delta = finished.saturating_sub(last_flushed);
    if delta == 0 {
        return false;
    }
    if total == 0 {
        return true;
    }
    delta.saturating_mul(100) >= total
}

/// Sending half handed to task and subtask contexts. Sends never block or fail.
#[derive(Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSender {
    /// A sender whose events go nowhere.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

pub(crate) fn progress_channel() -> (ProgressSender, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ProgressSender { tx: Some(tx) }, rx)
}

/// Live progress snapshots of running tasks, keyed by task id.
#[derive(Default)]
pub struct ProgressBoard {
    tasks: Mutex<HashMap<TaskId, ProgressDetail>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: TaskId) -> Option<ProgressDetail> {
        self.tasks.lock().get(&task_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<TaskId, ProgressDetail> {
        self.tasks.lock().clone()
    }

    fn update(&self, task_id: TaskId, detail: &ProgressDetail) {
        self.tasks.lock().insert(task_id, detail.clone());
    }

    pub(crate) fn remove(&self, task_id: TaskId) {
        self.tasks.lock().remove(&task_id);
    }
}

/// Consumer of one task's progress stream.
pub(crate) struct ProgressAggregator {
    task_id: TaskId,
    tasks: TaskStore,
    subtasks: SubtaskStore,
    board: Arc<ProgressBoard>,
    detail: ProgressDetail,
    last_flushed: u64,
}

impl ProgressAggregator {
    pub(crate) fn new(
        task_id: TaskId,
        tasks: TaskStore,
        subtasks: SubtaskStore,
        board: Arc<ProgressBoard>,
    ) -> Self {
        Self {
            task_id,
            tasks,
            subtasks,
            board,
            detail: ProgressDetail::default(),
            last_flushed: 0,
        }
    }

    /// Consume events until every sender is gone or `done` fires, then flush.
    pub(crate) fn spawn(
        mut self,
        mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
        mut done: oneshot::Receiver<()>,
    ) -> JoinHandle<ProgressDetail> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => self.apply(event),
                        None => break,
                    },
                    _ = &mut done => {
                        while let Ok(event) = rx.try_recv() {
                            self.apply(event);
                        }
                        break;
                    }
                }
            }
            self.flush_records();
            self.detail
        })
    }

    fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::SetTotalSubtasks(total) => {
                self.detail.total_subtasks = total;
            }
            ProgressEvent::AdvanceSubtask => {
                self.detail.finished_subtasks += 1;
                if let Err(e) = self.tasks.update_progress(self.task_id, self.detail.fraction()) {
                    tracing::warn!(task_id = self.task_id, error = %e, "Failed to persist task progress");
                }
            }
            ProgressEvent::SetCurrentSubtask { name, number } => {
                self.flush_records();
                self.detail.subtask_name = name;
                self.detail.subtask_number = number;
                self.detail.total_records = 0;
                self.detail.finished_records = 0;
                self.last_flushed = 0;
            }
            ProgressEvent::SetTotalRecords(total) => {
                self.detail.total_records = total;
            }
            ProgressEvent::AdvanceRecords(delta) => {
                self.detail.finished_records = self.detail.finished_records.saturating_add(delta);
                if should_flush_records(
                    self.detail.finished_records,
                    self.last_flushed,
                    self.detail.total_records,
                ) {
                    self.flush_records();
                }
            }
        }
        self.board.update(self.task_id, &self.detail);
    }

    fn flush_records(&mut self) {
        if self.detail.subtask_name.is_empty() || self.detail.finished_records == self.last_flushed
        {
            return;
        }
        match self.subtasks.update_finished_records(
            self.task_id,
            &self.detail.subtask_name,
            self.detail.finished_records,
        ) {
            Ok(()) => self.last_flushed = self.detail.finished_records,
            Err(e) => tracing::warn!(
                task_id = self.task_id,
                subtask = %self.detail.subtask_name,
                error = %e,
                "Failed to persist record progress"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PipelineStore;
    use crate::db::test_support::migrated_db;
    use crate::models::{NewPipeline, PipelineTaskSpec, SubtaskDescriptor};
    use tempfile::TempDir;

    #[test]
    fn test_should_flush_records_with_total() {
        assert!(!should_flush_records(0, 0, 1000));
        assert!(!should_flush_records(9, 0, 1000));
        assert!(should_flush_records(10, 0, 1000));
        assert!(!should_flush_records(15, 10, 1000));
        assert!(should_flush_records(20, 10, 1000));
        // Totals under 100 make every record count.
        assert!(should_flush_records(1, 0, 50));
    }

    #[test]
    fn test_should_flush_records_without_total() {
        assert!(should_flush_records(1, 0, 0));
        assert!(!should_flush_records(5, 5, 0));
        assert!(!should_flush_records(3, 5, 0));
    }

    #[test]
    fn test_fraction() {
        let detail = ProgressDetail {
            total_subtasks: 4,
            finished_subtasks: 1,
            ..Default::default()
        };
        assert_eq!(detail.fraction(), 0.25);
        assert_eq!(ProgressDetail::default().fraction(), 0.0);
    }

    #[test]
    fn test_disconnected_sender_is_noop() {
        ProgressSender::disconnected().send(ProgressEvent::AdvanceSubtask);
    }

    #[tokio::test]
    async fn test_aggregator_persists_progress_and_throttles_records() {
        let dir = TempDir::new().unwrap();
        let db = migrated_db(dir.path());
        let pipeline = PipelineStore::new(db.clone())
            .create(&NewPipeline {
                name: "p".into(),
                plan: vec![vec![PipelineTaskSpec::new("jira")]],
                ..Default::default()
            })
            .unwrap();
        let tasks = TaskStore::new(db.clone());
        let subtasks = SubtaskStore::new(db.clone());
        let task_id = tasks.list_by_pipeline(pipeline.id).unwrap()[0].id;
        subtasks
            .upsert_descriptors(
                task_id,
                &[SubtaskDescriptor {
                    name: "collectIssues".into(),
                    number: 1,
                    is_collector: true,
                }],
            )
            .unwrap();

        let board = Arc::new(ProgressBoard::new());
        let (sender, rx) = progress_channel();
        let (done_tx, done_rx) = oneshot::channel();
        let handle = ProgressAggregator::new(task_id, tasks.clone(), subtasks.clone(), board)
            .spawn(rx, done_rx);

        sender.send(ProgressEvent::SetTotalSubtasks(2));
        sender.send(ProgressEvent::SetCurrentSubtask {
            name: "collectIssues".into(),
            number: 1,
        });
        sender.send(ProgressEvent::SetTotalRecords(1000));
        sender.send(ProgressEvent::AdvanceRecords(5));
        sender.send(ProgressEvent::AdvanceRecords(7));
        sender.send(ProgressEvent::AdvanceSubtask);
        done_tx.send(()).unwrap();

        let detail = handle.await.unwrap();
        assert_eq!(detail.finished_subtasks, 1);
        assert_eq!(detail.finished_records, 12);
        assert_eq!(tasks.get(task_id).unwrap().progress, 0.5);
        let record = subtasks.get(task_id, "collectIssues").unwrap().unwrap();
        assert_eq!(record.finished_records, 12);
    }
}
