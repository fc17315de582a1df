//! In-memory registry of resize tasks and their progress

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ResizePolicy;
use crate::error::{Result, ResizeError};
use crate::ids::{OutputId, TaskId};

/// Lifecycle of a task. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output file of a task, with the name it is downloaded under
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    pub id: OutputId,
    pub path: PathBuf,
    pub filename: String,
}

/// State of one resize task
#[derive(Debug, Clone, Serialize)]
pub struct ResizeTask {
    pub id: TaskId,
    pub status: TaskStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Outputs in completion order
    pub outputs: Vec<TaskOutput>,
    pub error: Option<String>,
    pub policy: ResizePolicy,
    pub width: u32,
    pub height: u32,
    #[serde(skip)]
    pub created_at: Instant,
}

impl ResizeTask {
    /// A fresh task in the processing state
    pub fn new(id: TaskId, total: usize, policy: ResizePolicy, width: u32, height: u32) -> Self {
        Self {
            id,
            status: TaskStatus::Processing,
            total,
            completed: 0,
            failed: 0,
            outputs: Vec::new(),
            error: None,
            policy,
            width,
            height,
            created_at: Instant::now(),
        }
    }

    /// Percentage of successful units, rounded to two decimals
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let raw = self.completed as f64 / self.total as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn progress(&self) -> ProgressReport {
        ProgressReport {
            task_id: self.id,
            status: self.status,
            percent: self.percent(),
            completed: self.completed,
            failed: self.failed,
            total: self.total,
        }
    }
}

/// Point-in-time progress of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub percent: f64,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Thread-safe map from task id to task state.
///
/// Each mutation takes the write lock once, so a reader never sees a count
/// without its matching output.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, ResizeTask>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: ResizeTask) {
        debug!("Registering task {} with {} units", task.id, task.total);
        self.tasks.write().insert(task.id, task);
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.read().contains_key(id)
    }

    /// Append an output and count it as completed
    pub fn record_success(&self, id: &TaskId, output: TaskOutput) -> Result<()> {
        self.update(id, |task| {
            if task.completed + task.failed >= task.total {
                warn!("Task {} received more results than units; ignoring {}", task.id, output.id);
                return;
            }
            task.outputs.push(output);
            task.completed += 1;
        })
    }

    /// Count a unit that produced no output
    pub fn record_failure(&self, id: &TaskId) -> Result<()> {
        self.update(id, |task| {
            if task.completed + task.failed < task.total {
                task.failed += 1;
            }
        })
    }

    /// Finish a task whose waves all settled.
    ///
    /// Status is completed unless `fail_on_partial` is set and a unit failed.
    pub fn finish(&self, id: &TaskId, fail_on_partial: bool) -> Result<TaskStatus> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id).ok_or(ResizeError::TaskNotFound(*id))?;

        if task.status.is_terminal() {
            return Ok(task.status);
        }

        if fail_on_partial && task.failed > 0 {
            task.status = TaskStatus::Error;
            task.error = Some(format!(
                "{} of {} images failed to resize",
                task.failed, task.total
            ));
        } else {
            task.status = TaskStatus::Completed;
        }
        Ok(task.status)
    }

    /// Mark a task as errored. Returns false if the task no longer exists.
    pub fn fail(&self, id: &TaskId, message: impl Into<String>) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(id) {
            Some(task) if !task.status.is_terminal() => {
                task.status = TaskStatus::Error;
                task.error = Some(message.into());
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn progress(&self, id: &TaskId) -> Option<ProgressReport> {
        self.tasks.read().get(id).map(ResizeTask::progress)
    }

    pub fn snapshot(&self, id: &TaskId) -> Option<ResizeTask> {
        self.tasks.read().get(id).cloned()
    }

    pub fn remove(&self, id: &TaskId) -> Option<ResizeTask> {
        self.tasks.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Tasks that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|task| !task.status.is_terminal())
            .count()
    }

    fn update<F>(&self, id: &TaskId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut ResizeTask),
    {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(id).ok_or(ResizeError::TaskNotFound(*id))?;
        if task.status.is_terminal() {
            warn!("Ignoring update to {} task {}", task.status, task.id);
            return Ok(());
        }
        mutate(task);
        Ok(())
    }
}
