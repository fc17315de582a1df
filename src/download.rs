//! Packaging of task outputs for download

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, ResizeError};
use crate::parallel::{ResizeTask, TaskStatus};
use crate::processing::{ARCHIVE_MIME, OUTPUT_MIME};

/// Name of the archive returned for multi-output tasks
pub const ARCHIVE_FILENAME: &str = "resized_images.zip";

/// A task's result, ready to hand to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// The only output, as raw PNG bytes
    Single { filename: String, bytes: Vec<u8> },
    /// Every output in a deflate ZIP
    Archive { filename: String, bytes: Vec<u8> },
}

impl Download {
    /// Package the outputs of a completed task.
    ///
    /// # Errors
    ///
    /// `TaskNotTerminal` unless the task completed, `NoOutputs` when it
    /// completed without producing anything, I/O or archive errors otherwise.
    pub async fn for_task(task: &ResizeTask) -> Result<Self> {
        if task.status != TaskStatus::Completed {
            return Err(ResizeError::TaskNotTerminal(task.id));
        }

        match task.outputs.as_slice() {
            [] => Err(ResizeError::NoOutputs(task.id)),
            [only] => {
                let bytes = tokio::fs::read(&only.path).await?;
                Ok(Self::Single {
                    filename: only.filename.clone(),
                    bytes,
                })
            }
            outputs => {
                let mut entries = Vec::with_capacity(outputs.len());
                let names = unique_names(outputs.iter().map(|o| o.filename.as_str()));
                for (output, name) in outputs.iter().zip(names) {
                    entries.push((name, tokio::fs::read(&output.path).await?));
                }

                let bytes = tokio::task::spawn_blocking(move || build_archive(entries))
                    .await
                    .map_err(|e| ResizeError::pool(format!("Archive task failed: {}", e)))??;

                debug!("Built archive for task {} ({} bytes)", task.id, bytes.len());
                Ok(Self::Archive {
                    filename: ARCHIVE_FILENAME.to_string(),
                    bytes,
                })
            }
        }
    }

    pub fn filename(&self) -> &str {
        match self {
            Self::Single { filename, .. } | Self::Archive { filename, .. } => filename,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Single { bytes, .. } | Self::Archive { bytes, .. } => bytes,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Single { .. } => OUTPUT_MIME,
            Self::Archive { .. } => ARCHIVE_MIME,
        }
    }

    /// Write to `path`, or into `path` under the download's own name when it
    /// is a directory. Returns where the bytes went.
    pub async fn write_to(&self, path: &Path) -> Result<std::path::PathBuf> {
        let target = if tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
            path.join(self.filename())
        } else {
            path.to_path_buf()
        };
        tokio::fs::write(&target, self.bytes()).await?;
        Ok(target)
    }
}

/// Make archive entry names unique: `a.png`, `a_2.png`, `a_3.png`, ...
pub fn unique_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut used = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if used.insert(name.to_string()) {
                return name.to_string();
            }

            let (stem, extension) = match name.rsplit_once('.') {
                Some((stem, ext)) => (stem, format!(".{}", ext)),
                None => (name, String::new()),
            };
            let mut counter = 2;
            loop {
                let candidate = format!("{}_{}{}", stem, counter, extension);
                if used.insert(candidate.clone()) {
                    return candidate;
                }
                counter += 1;
            }
        })
        .collect()
}

fn build_archive(entries: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }

    Ok(writer.finish()?.into_inner())
}
