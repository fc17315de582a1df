//! BatchResize - Asynchronous Batch Image Resize Engine
//!
//! Accepts batches of uploaded images, resizes each to a target size under
//! one of three policies and hands the results back as a single PNG or a ZIP
//! archive. Tasks run in the background in waves sized to the worker pool and
//! report progress while they run.
//!
//! # Features
//!
//! - **Three Policies**: stretch, fit (padded canvas) and fill (centre crop)
//! - **Wave Scheduling**: CPU-bound work on a rayon pool, bookkeeping on Tokio
//! - **Progress Tracking**: per-task completed / failed / total counts
//! - **Prometheus Metrics**: per-service registry with text exposition
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batchresize::{Config, IncomingFile, ResizePolicy, ResizeRequest, ResizeService};
//! use std::path::Path;
//!
//! # async fn run() -> batchresize::Result<()> {
//! let service = ResizeService::new(Config::default())?;
//!
//! let bytes = std::fs::read("photo.jpg")?;
//! let uploaded = service
//!     .upload(vec![IncomingFile::new("photo.jpg", "image/jpeg", bytes)])
//!     .await?;
//!
//! let request = ResizeRequest::new(uploaded.iter().map(|f| f.id).collect(), 800, 600)
//!     .policy(ResizePolicy::Fill);
//! let handle = service.start_resize(request)?;
//! let task_id = handle.id();
//! handle.wait().await?;
//!
//! let download = service.download(&task_id).await?;
//! download.write_to(Path::new(".")).await?;
//! service.cleanup(&task_id).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod parallel;
pub mod processing;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, FillColor, ResizePolicy, ResizeRequest};
pub use download::Download;
pub use error::{Result, ResizeError};
pub use ids::{FileId, OutputId, TaskId};
pub use parallel::{ProgressReport, ResizeTask, TaskHandle, TaskOutcome, TaskStatus};
pub use processing::{PixelResizer, ResizeUnit, UnitFailure, UnitOutput, UnitResizer};
pub use service::{CleanupReport, IncomingFile, ResizeService};
pub use storage::{RemovalReport, UploadedFile};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging from `RUST_LOG` and log system capabilities.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!("BatchResize v{} initialized", VERSION);
    }

    validate_system_requirements()
}

/// Initialize with custom configuration
pub fn init_with_config(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', using info", config.logging.level);
        EnvFilter::new("info")
    });

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.logging.json_format {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    if installed.is_ok() {
        info!("BatchResize v{} initialized with custom config", VERSION);
    }

    validate_system_requirements()
}

fn validate_system_requirements() -> Result<()> {
    use sysinfo::{System, SystemExt};

    let mut system = System::new();
    system.refresh_memory();

    let available_memory = system.available_memory();
    const MIN_MEMORY_MB: u64 = 512;

    if available_memory < MIN_MEMORY_MB * 1024 * 1024 {
        warn!(
            "Low available memory: {}MB (recommended: >{}MB)",
            available_memory / (1024 * 1024),
            MIN_MEMORY_MB
        );
    }

    info!(
        "Detected {} physical cores, {} worker slots available",
        system.physical_core_count().unwrap_or(1),
        parallel::default_capacity()
    );
    info!(
        "Decoders: JPEG {}, PNG {}, WebP {}",
        image::ImageFormat::Jpeg.can_read(),
        image::ImageFormat::Png.can_read(),
        image::ImageFormat::WebP.can_read()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_init() {
        // Should not fail on multiple calls
        assert!(init().is_ok());
        assert!(init_with_config(&Config::default()).is_ok());
    }
}
