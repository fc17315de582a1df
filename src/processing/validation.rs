//! Upload and request validation

use tracing::{debug, warn};

use crate::config::{ResizeRequest, StorageConfig, MAX_DIMENSION};
use crate::error::{Result, ResizeError};
use crate::processing::formats::is_image_content_type;

/// Gatekeeper applied to uploads before they reach the store
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_file_size: u64,
    max_files: usize,
}

impl UploadValidator {
    /// Create a validator with custom limits
    pub fn with_limits(max_file_size: u64, max_files: usize) -> Self {
        Self {
            max_file_size,
            max_files,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_limits(config.max_file_size, config.max_files)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Reject batches with more files than allowed
    pub fn validate_batch(&self, file_count: usize) -> Result<()> {
        if file_count == 0 {
            return Err(ResizeError::invalid_parameters("No files provided"));
        }
        if file_count > self.max_files {
            return Err(ResizeError::invalid_parameters(format!(
                "Maximum {} files allowed, got {}",
                self.max_files, file_count
            )));
        }
        Ok(())
    }

    /// Check one upload's declared content type and size
    pub fn validate_upload(&self, filename: &str, content_type: &str, size: u64) -> Result<()> {
        debug!("Validating upload: {} ({}, {} bytes)", filename, content_type, size);

        if !is_image_content_type(content_type) {
            warn!("Rejected upload {}: content type {}", filename, content_type);
            return Err(ResizeError::upload_rejected(
                format!("File is not an image ({})", content_type),
                filename,
            ));
        }

        if size == 0 {
            return Err(ResizeError::upload_rejected("File is empty", filename));
        }

        if size > self.max_file_size {
            warn!("Rejected upload {}: {} bytes over limit", filename, size);
            return Err(ResizeError::upload_rejected(
                format!(
                    "File too large: {:.1}MB exceeds maximum {:.1}MB",
                    size as f64 / 1024.0 / 1024.0,
                    self.max_file_size as f64 / 1024.0 / 1024.0
                ),
                filename,
            ));
        }

        Ok(())
    }
}

impl Default for UploadValidator {
    fn default() -> Self {
        Self::from_config(&StorageConfig::default())
    }
}

/// Validate the shape of a resize request before any task exists
pub fn validate_request(request: &ResizeRequest) -> Result<()> {
    if request.file_ids.is_empty() {
        return Err(ResizeError::invalid_parameters("At least one file id is required"));
    }
    validate_dimension("width", request.width)?;
    validate_dimension("height", request.height)?;
    Ok(())
}

fn validate_dimension(name: &str, value: u32) -> Result<()> {
    if value == 0 || value > MAX_DIMENSION {
        return Err(ResizeError::invalid_parameters(format!(
            "{} must be between 1 and {}, got {}",
            name, MAX_DIMENSION, value
        )));
    }
    Ok(())
}
