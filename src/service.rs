//! Service facade tying uploads, tasks, downloads and cleanup together

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, ResizeRequest};
use crate::download::Download;
use crate::error::{Result, ResizeError};
use crate::ids::{FileId, TaskId};
use crate::metrics::Metrics;
use crate::parallel::{
    BatchOrchestrator, ProgressReport, ResizeTask, TaskHandle, TaskRegistry, WorkerPool,
};
use crate::processing::{PixelResizer, UnitResizer, UploadValidator};
use crate::storage::{RemovalReport, UploadStore, UploadedFile};

/// One file of an upload batch as received from a client
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// What a cleanup removed. Failures are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub outputs: RemovalReport,
    pub uploads: RemovalReport,
}

impl CleanupReport {
    pub fn failed(&self) -> usize {
        self.outputs.failed + self.uploads.failed
    }
}

/// Batch resize service: the entry point front ends talk to
pub struct ResizeService {
    config: Config,
    uploads: Arc<UploadStore>,
    registry: Arc<TaskRegistry>,
    orchestrator: BatchOrchestrator,
    validator: UploadValidator,
    metrics: Metrics,
}

impl ResizeService {
    /// Build a service using the pixel resizer configured in `config`
    pub fn new(config: Config) -> Result<Self> {
        let resizer = Arc::new(PixelResizer::new(config.processing.filter));
        Self::with_resizer(config, resizer)
    }

    /// Build a service around a custom unit resizer
    pub fn with_resizer(config: Config, resizer: Arc<dyn UnitResizer>) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(config.processing.workers)?);
        let registry = Arc::new(TaskRegistry::new());
        let uploads = Arc::new(UploadStore::new(config.storage.upload_dir.clone()));
        let metrics = Metrics::new()?;

        let orchestrator = BatchOrchestrator::new(
            pool,
            Arc::clone(&registry),
            Arc::clone(&uploads),
            resizer,
            metrics.clone(),
            config.storage.output_dir.clone(),
        )
        .fail_on_partial(config.processing.fail_on_partial);

        info!(
            "Resize service ready (uploads: {:?}, outputs: {:?})",
            config.storage.upload_dir, config.storage.output_dir
        );

        Ok(Self {
            validator: UploadValidator::from_config(&config.storage),
            config,
            uploads,
            registry,
            orchestrator,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Validate and store a batch of uploads.
    ///
    /// The whole batch is checked before anything is written, so a rejected
    /// batch leaves no files behind.
    pub async fn upload(&self, files: Vec<IncomingFile>) -> Result<Vec<UploadedFile>> {
        self.validator.validate_batch(files.len())?;
        for file in &files {
            self.validator
                .validate_upload(&file.filename, &file.content_type, file.bytes.len() as u64)?;
        }

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            let uploaded = self
                .uploads
                .ingest(&file.bytes, &file.filename, &file.content_type)
                .await?;
            self.metrics.record_upload(uploaded.size);
            stored.push(uploaded);
        }

        info!("Uploaded {} files", stored.len());
        Ok(stored)
    }

    /// Start resizing previously uploaded files
    pub fn start_resize(&self, request: ResizeRequest) -> Result<TaskHandle> {
        self.orchestrator.start(request)
    }

    pub fn progress(&self, id: &TaskId) -> Result<ProgressReport> {
        self.registry.progress(id).ok_or(ResizeError::TaskNotFound(*id))
    }

    pub fn result(&self, id: &TaskId) -> Result<ResizeTask> {
        self.registry.snapshot(id).ok_or(ResizeError::TaskNotFound(*id))
    }

    /// Package a completed task's outputs
    pub async fn download(&self, id: &TaskId) -> Result<Download> {
        let task = self.result(id)?;
        Download::for_task(&task).await
    }

    /// Delete uploads by id once a caller no longer needs them
    pub async fn remove_uploads(&self, ids: &[FileId]) -> RemovalReport {
        let report = self.uploads.remove(ids).await;
        debug!("Removed {} uploads ({} failures)", report.removed, report.failed);
        report
    }

    /// Delete a task's outputs and uploads and forget the task
    pub async fn cleanup(&self, id: &TaskId) -> Result<CleanupReport> {
        let task = self.registry.remove(id).ok_or(ResizeError::TaskNotFound(*id))?;
        let mut outputs = RemovalReport::default();

        for output in &task.outputs {
            match tokio::fs::remove_file(&output.path).await {
                Ok(()) => {
                    debug!("Removed output {:?}", output.path);
                    outputs.removed += 1;
                }
                Err(e) => {
                    warn!("Failed to remove output {:?}: {}", output.path, e);
                    outputs.failed += 1;
                }
            }
        }

        let report = CleanupReport {
            outputs,
            uploads: self.uploads.remove_matching(id).await,
        };

        info!(
            "Cleaned up task {}: {} outputs, {} uploads removed, {} failures",
            id,
            report.outputs.removed,
            report.uploads.removed,
            report.failed()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("outputs");
        config.storage.max_files = 2;
        config.processing.workers = Some(1);
        config
    }

    #[tokio::test]
    async fn test_rejected_batch_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let service = ResizeService::new(config_in(&dir)).unwrap();

        let batch = vec![
            IncomingFile::new("a.png", "image/png", vec![1]),
            IncomingFile::new("b.txt", "text/plain", vec![1]),
        ];
        let err = service.upload(batch).await.unwrap_err();
        assert!(matches!(err, ResizeError::UploadRejected { .. }));
        assert!(!dir.path().join("uploads").exists());

        let too_many = (0..3)
            .map(|i| IncomingFile::new(format!("{}.png", i), "image/png", vec![1]))
            .collect();
        assert!(service.upload(too_many).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_task_not_found() {
        let dir = TempDir::new().unwrap();
        let service = ResizeService::new(config_in(&dir)).unwrap();
        let id = TaskId::new();

        assert!(service.progress(&id).unwrap_err().is_not_found());
        assert!(service.result(&id).unwrap_err().is_not_found());
        assert!(service.download(&id).await.unwrap_err().is_not_found());
        assert!(service.cleanup(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_upload_metrics() {
        let dir = TempDir::new().unwrap();
        let service = ResizeService::new(config_in(&dir)).unwrap();
        service
            .upload(vec![IncomingFile::new("a.png", "image/png", vec![0; 10])])
            .await
            .unwrap();
        assert_eq!(service.metrics().snapshot().images_uploaded_total, 1);
    }
}
