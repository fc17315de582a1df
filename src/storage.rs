//! Upload storage: maps opaque file ids to bytes on disk

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ids::{FileId, TaskId};

/// An ingested upload. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedFile {
    pub id: FileId,
    /// Name the client declared; only used to derive output names
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: String,
}

/// Outcome of a best-effort deletion sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub removed: usize,
    pub failed: usize,
}

impl RemovalReport {
    pub fn merge(&mut self, other: RemovalReport) {
        self.removed += other.removed;
        self.failed += other.failed;
    }
}

/// Stores uploads under `<upload_dir>/<id>_<sanitized filename>`
#[derive(Debug)]
pub struct UploadStore {
    dir: PathBuf,
    files: RwLock<HashMap<FileId, UploadedFile>>,
}

impl UploadStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` under a fresh id and remember where they went
    pub async fn ingest(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: &str,
    ) -> Result<UploadedFile> {
        fs::create_dir_all(&self.dir).await?;

        let id = FileId::new();
        let path = self.dir.join(format!("{}_{}", id, sanitize_filename(filename)));
        fs::write(&path, bytes).await?;

        let file = UploadedFile {
            id,
            filename: filename.to_string(),
            path,
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
        };

        debug!("Stored upload {} ({}, {} bytes) at {:?}", id, filename, file.size, file.path);
        self.files.write().insert(id, file.clone());
        Ok(file)
    }

    pub fn resolve(&self, id: &FileId) -> Option<UploadedFile> {
        self.files.read().get(id).cloned()
    }

    /// Delete every stored upload whose file name embeds `task_id`.
    ///
    /// Missing directories and individual deletion errors are logged and
    /// counted, never returned.
    pub async fn remove_matching(&self, task_id: &TaskId) -> RemovalReport {
        let needle = task_id.to_string();
        let mut report = RemovalReport::default();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Upload directory {:?} not readable: {}", self.dir, e);
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to list upload directory {:?}: {}", self.dir, e);
                    report.failed += 1;
                    break;
                }
            };

            let name = entry.file_name();
            if !name.to_string_lossy().contains(&needle) {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.removed += 1;
                    self.files.write().retain(|_, file| file.path != path);
                }
                Err(e) => {
                    warn!("Failed to delete upload {:?}: {}", path, e);
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 {
            info!("Removed {} uploads for task {}", report.removed, task_id);
        }
        report
    }

    /// Delete specific uploads by id, best-effort
    pub async fn remove(&self, ids: &[FileId]) -> RemovalReport {
        let mut report = RemovalReport::default();
        for id in ids {
            let removed = self.files.write().remove(id);
            let Some(file) = removed else {
                continue;
            };
            match fs::remove_file(&file.path).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!("Failed to delete upload {:?}: {}", file.path, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

/// Reduce a client-declared name to a safe single path component
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
