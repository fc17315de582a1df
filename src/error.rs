//! Error types and handling for BatchResize

use thiserror::Error;

use crate::ids::TaskId;

/// Result type alias for BatchResize operations
pub type Result<T> = std::result::Result<T, ResizeError>;

/// Main error type for BatchResize operations
#[derive(Debug, Error)]
pub enum ResizeError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Malformed or out-of-range request parameters
    #[error("Invalid resize parameters: {message}")]
    InvalidParameters { message: String },

    /// Upload rejected before it reached the store
    #[error("Upload rejected: {message} (file: {filename})")]
    UploadRejected { message: String, filename: String },

    /// None of the requested file ids resolved to an upload
    #[error("No valid files found")]
    EmptyBatch,

    /// Unknown (or already cleaned up) task id
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Result requested before the task completed
    #[error("Task not completed: {0}")]
    TaskNotTerminal(TaskId),

    /// Task completed but every unit failed
    #[error("Task {0} produced no output")]
    NoOutputs(TaskId),

    /// A worker thread panicked while running a unit
    #[error("Worker panicked: {message}")]
    WorkerPanicked { message: String },

    /// A worker went away without reporting a result
    #[error("Worker pool error: {message}")]
    PoolError { message: String },

    /// Archive assembly errors
    #[error("Archive error: {0}")]
    ArchiveError(#[from] zip::result::ZipError),

    /// Metrics registration errors
    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),
}

impl ResizeError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new invalid parameters error
    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Create a new upload rejection
    pub fn upload_rejected<S: Into<String>, F: Into<String>>(message: S, filename: F) -> Self {
        Self::UploadRejected {
            message: message.into(),
            filename: filename.into(),
        }
    }

    /// Create a new worker pool error
    pub fn pool<S: Into<String>>(message: S) -> Self {
        Self::PoolError {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller rather than the service.
    ///
    /// Front ends map these to "bad request" / "not found" style responses.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidParameters { .. }
            | Self::UploadRejected { .. }
            | Self::EmptyBatch
            | Self::TaskNotFound(_)
            | Self::TaskNotTerminal(_)
            | Self::NoOutputs(_) => true,

            Self::IoError(_)
            | Self::ConfigError { .. }
            | Self::WorkerPanicked { .. }
            | Self::PoolError { .. }
            | Self::ArchiveError(_)
            | Self::MetricsError(_)
            | Self::SerdeError(_) => false,
        }
    }

    /// Whether the error means the addressed entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound(_))
    }
}

impl From<toml::de::Error> for ResizeError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for ResizeError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML parsing error: {}", err))
    }
}
