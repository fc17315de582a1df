//! Wave-based batch orchestration of resize tasks

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{OutputNaming, ResizeRequest};
use crate::error::{Result, ResizeError};
use crate::ids::{OutputId, TaskId};
use crate::metrics::Metrics;
use crate::processing::{validate_request, ResizeUnit, UnitFailure, UnitOutput, UnitResizer};
use crate::storage::{UploadStore, UploadedFile};

pub mod pool;
pub mod registry;

pub use pool::*;
pub use registry::*;

/// Final tally of a task once it reached a terminal state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// Joinable handle to a task running in the background
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    join: JoinHandle<TaskOutcome>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until the task is terminal
    pub async fn wait(self) -> Result<TaskOutcome> {
        self.join
            .await
            .map_err(|e| ResizeError::pool(format!("Task {} orchestration aborted: {}", self.id, e)))
    }
}

/// Starts resize tasks and drives them wave by wave through the worker pool
#[derive(Clone)]
pub struct BatchOrchestrator {
    pool: Arc<WorkerPool>,
    registry: Arc<TaskRegistry>,
    uploads: Arc<UploadStore>,
    resizer: Arc<dyn UnitResizer>,
    metrics: Metrics,
    output_dir: PathBuf,
    naming: OutputNaming,
    fail_on_partial: bool,
}

impl BatchOrchestrator {
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<TaskRegistry>,
        uploads: Arc<UploadStore>,
        resizer: Arc<dyn UnitResizer>,
        metrics: Metrics,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            registry,
            uploads,
            resizer,
            metrics,
            output_dir: output_dir.into(),
            naming: OutputNaming::default(),
            fail_on_partial: false,
        }
    }

    /// Mark tasks with any failed unit as errored instead of completed
    pub fn fail_on_partial(mut self, enabled: bool) -> Self {
        self.fail_on_partial = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Register a task for `request` and start processing it in the background.
    ///
    /// Unknown file ids are skipped. Must be called from within a Tokio runtime.
    pub fn start(&self, request: ResizeRequest) -> Result<TaskHandle> {
        validate_request(&request)?;

        let files: Vec<UploadedFile> = request
            .file_ids
            .iter()
            .filter_map(|id| {
                let file = self.uploads.resolve(id);
                if file.is_none() {
                    debug!("Skipping unknown file id {}", id);
                }
                file
            })
            .collect();

        if files.is_empty() {
            return Err(ResizeError::EmptyBatch);
        }

        let task_id = TaskId::new();
        self.registry.insert(ResizeTask::new(
            task_id,
            files.len(),
            request.policy,
            request.width,
            request.height,
        ));
        self.metrics.task_started(request.policy, files.len());

        info!(
            "Started task {}: {} images -> {}x{} ({})",
            task_id,
            files.len(),
            request.width,
            request.height,
            request.policy
        );

        let run = TaskRun {
            id: task_id,
            request,
            files,
            orchestrator: self.clone(),
        };
        let join = tokio::spawn(run.execute());

        Ok(TaskHandle { id: task_id, join })
    }
}

/// One task's background execution
struct TaskRun {
    id: TaskId,
    request: ResizeRequest,
    files: Vec<UploadedFile>,
    orchestrator: BatchOrchestrator,
}

impl TaskRun {
    async fn execute(self) -> TaskOutcome {
        let registry = Arc::clone(&self.orchestrator.registry);
        let metrics = self.orchestrator.metrics.clone();
        let policy = self.request.policy;
        let id = self.id;

        let result = self.run_waves().await;
        let result = match result {
            Ok(()) => registry.finish(&id, self.orchestrator.fail_on_partial).map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {}
            Err(ResizeError::TaskNotFound(_)) => {
                warn!("Task {} was removed before it finished", id);
            }
            Err(e) => {
                error!("Task {} failed: {}", id, e);
                registry.fail(&id, e.to_string());
            }
        }

        match registry.snapshot(&id) {
            Some(task) => {
                metrics.task_finished(policy, task.status, task.elapsed());
                if let Some(message) = &task.error {
                    warn!("Task {} ended in error: {}", id, message);
                } else {
                    info!(
                        "Task {} completed: {} succeeded, {} failed in {:.2}s",
                        id,
                        task.completed,
                        task.failed,
                        task.elapsed().as_secs_f64()
                    );
                }
                TaskOutcome {
                    task_id: id,
                    status: task.status,
                    succeeded: task.completed,
                    failed: task.failed,
                    error: task.error,
                }
            }
            None => {
                metrics.task_finished(policy, TaskStatus::Error, Duration::ZERO);
                TaskOutcome {
                    task_id: id,
                    status: TaskStatus::Error,
                    succeeded: 0,
                    failed: 0,
                    error: Some(format!("Task {} was removed before it finished", id)),
                }
            }
        }
    }

    async fn run_waves(&self) -> Result<()> {
        let orchestrator = &self.orchestrator;
        tokio::fs::create_dir_all(&orchestrator.output_dir)
            .await
            .map_err(|e| {
                error!("Failed to create output directory {:?}: {}", orchestrator.output_dir, e);
                ResizeError::from(e)
            })?;

        let capacity = orchestrator.pool.capacity();
        let wave_count = (self.files.len() + capacity - 1) / capacity;

        for (wave_index, wave) in self.files.chunks(capacity).enumerate() {
            if !orchestrator.registry.contains(&self.id) {
                return Err(ResizeError::TaskNotFound(self.id));
            }

            debug!(
                "Task {}: wave {}/{} with {} units",
                self.id,
                wave_index + 1,
                wave_count,
                wave.len()
            );

            let (units, filenames): (Vec<ResizeUnit>, Vec<String>) = wave
                .iter()
                .map(|file| {
                    (
                        self.build_unit(file),
                        orchestrator.naming.derive_filename(&file.filename),
                    )
                })
                .unzip();
            let output_paths: Vec<PathBuf> = units.iter().map(|u| u.output_path.clone()).collect();

            let resizer = Arc::clone(&orchestrator.resizer);
            let results = match orchestrator
                .pool
                .run_wave(units, move |unit| resize_unit(resizer.as_ref(), &unit))
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    discard_outputs(&output_paths).await;
                    return Err(e);
                }
            };

            for (index, (result, filename)) in results.into_iter().zip(filenames).enumerate() {
                let recorded = match result {
                    Ok(output) => {
                        orchestrator.metrics.record_unit_success(
                            self.request.policy,
                            output.processing_time,
                            output.file_size,
                        );
                        orchestrator.registry.record_success(
                            &self.id,
                            TaskOutput {
                                id: output.output_id,
                                path: output.path,
                                filename,
                            },
                        )
                    }
                    Err(failure) => {
                        warn!("Task {}: {}", self.id, failure);
                        orchestrator.metrics.record_unit_failure(self.request.policy);
                        orchestrator.registry.record_failure(&self.id)
                    }
                };

                if let Err(e) = recorded {
                    discard_outputs(&output_paths[index..]).await;
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn build_unit(&self, file: &UploadedFile) -> ResizeUnit {
        let output_id = OutputId::new();
        let orchestrator = &self.orchestrator;
        let output_path = orchestrator.output_dir.join(format!(
            "{}_{}.{}",
            self.id, output_id, orchestrator.naming.extension
        ));

        ResizeUnit {
            output_id,
            source: file.path.clone(),
            output_path,
            width: self.request.width,
            height: self.request.height,
            policy: self.request.policy,
            fill: self.request.fill_spec_for(&file.id),
        }
    }
}

/// Run one unit, turning a panic into a failure of that unit alone
fn resize_unit(
    resizer: &dyn UnitResizer,
    unit: &ResizeUnit,
) -> std::result::Result<UnitOutput, UnitFailure> {
    panic::catch_unwind(AssertUnwindSafe(|| resizer.resize(unit))).unwrap_or_else(|payload| {
        let message = pool::panic_message(payload.as_ref());
        error!("Worker panicked on {:?}: {}", unit.source, message);
        Err(UnitFailure::new(
            &unit.source,
            format!("worker panicked: {}", message),
        ))
    })
}

/// Best-effort removal of outputs that were written but never recorded
async fn discard_outputs(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("Discarded unrecorded output {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard output {:?}: {}", path, e),
        }
    }
}
