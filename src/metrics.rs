//! Prometheus metrics owned by a resize service instance.
//!
//! # Design
//! - Each service owns its own `Registry`; nothing is registered globally.
//! - Recording never fails and never influences task outcomes.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use serde::Serialize;

use crate::config::ResizePolicy;
use crate::error::{Result, ResizeError};
use crate::parallel::TaskStatus;

const UPLOAD_SIZE_BUCKETS: [f64; 6] = [
    1_024.0,
    10_240.0,
    102_400.0,
    1_048_576.0,
    10_485_760.0,
    104_857_600.0,
];
const OUTPUT_SIZE_BUCKETS: [f64; 5] = [1_024.0, 10_240.0, 102_400.0, 1_048_576.0, 10_485_760.0];
const IMAGES_PER_TASK_BUCKETS: [f64; 7] = [1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// Prometheus-backed metrics for uploads, units and tasks.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    images_uploaded_total: IntCounter,
    images_uploaded_size_bytes: Histogram,
    images_processed_total: IntCounterVec,
    image_processing_duration_seconds: HistogramVec,
    image_output_size_bytes: Histogram,
    resize_tasks_total: IntCounterVec,
    resize_task_duration_seconds: HistogramVec,
    images_per_task: Histogram,
    active_tasks: IntGauge,
}

/// Snapshot of the counters used by health output and tests
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub images_uploaded_total: u64,
    pub active_tasks: i64,
}

impl Metrics {
    /// Construct a registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be created or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let images_uploaded_total = IntCounter::with_opts(Opts::new(
            "images_uploaded_total",
            "Total number of images uploaded",
        ))?;
        let images_uploaded_size_bytes = Histogram::with_opts(
            HistogramOpts::new("images_uploaded_size_bytes", "Size of uploaded images in bytes")
                .buckets(UPLOAD_SIZE_BUCKETS.to_vec()),
        )?;
        let images_processed_total = IntCounterVec::new(
            Opts::new("images_processed_total", "Total number of images processed"),
            &["mode", "status"],
        )?;
        let image_processing_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "image_processing_duration_seconds",
                "Time taken to process a single image in seconds",
            ),
            &["mode"],
        )?;
        let image_output_size_bytes = Histogram::with_opts(
            HistogramOpts::new("image_output_size_bytes", "Size of processed output images in bytes")
                .buckets(OUTPUT_SIZE_BUCKETS.to_vec()),
        )?;
        let resize_tasks_total = IntCounterVec::new(
            Opts::new("resize_tasks_total", "Total number of resize tasks"),
            &["mode", "status"],
        )?;
        let resize_task_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "resize_task_duration_seconds",
                "Time taken to complete a resize task in seconds",
            ),
            &["mode"],
        )?;
        let images_per_task = Histogram::with_opts(
            HistogramOpts::new("images_per_task", "Number of images accepted per task")
                .buckets(IMAGES_PER_TASK_BUCKETS.to_vec()),
        )?;
        let active_tasks = IntGauge::with_opts(Opts::new(
            "active_tasks",
            "Number of currently active resize tasks",
        ))?;

        registry.register(Box::new(images_uploaded_total.clone()))?;
        registry.register(Box::new(images_uploaded_size_bytes.clone()))?;
        registry.register(Box::new(images_processed_total.clone()))?;
        registry.register(Box::new(image_processing_duration_seconds.clone()))?;
        registry.register(Box::new(image_output_size_bytes.clone()))?;
        registry.register(Box::new(resize_tasks_total.clone()))?;
        registry.register(Box::new(resize_task_duration_seconds.clone()))?;
        registry.register(Box::new(images_per_task.clone()))?;
        registry.register(Box::new(active_tasks.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                images_uploaded_total,
                images_uploaded_size_bytes,
                images_processed_total,
                image_processing_duration_seconds,
                image_output_size_bytes,
                resize_tasks_total,
                resize_task_duration_seconds,
                images_per_task,
                active_tasks,
            }),
        })
    }

    /// Count an accepted upload and its size
    pub fn record_upload(&self, size: u64) {
        self.inner.images_uploaded_total.inc();
        self.inner.images_uploaded_size_bytes.observe(size as f64);
    }

    /// Record a unit that produced an output
    pub fn record_unit_success(&self, policy: ResizePolicy, duration: Duration, output_size: u64) {
        let mode = policy.as_str();
        self.inner
            .images_processed_total
            .with_label_values(&[mode, "success"])
            .inc();
        self.inner
            .image_processing_duration_seconds
            .with_label_values(&[mode])
            .observe(duration.as_secs_f64());
        self.inner.image_output_size_bytes.observe(output_size as f64);
    }

    /// Record a unit that produced no output
    pub fn record_unit_failure(&self, policy: ResizePolicy) {
        self.inner
            .images_processed_total
            .with_label_values(&[policy.as_str(), "error"])
            .inc();
    }

    /// A task entered the processing state with `images` accepted files
    pub fn task_started(&self, policy: ResizePolicy, images: usize) {
        self.inner
            .resize_tasks_total
            .with_label_values(&[policy.as_str(), "started"])
            .inc();
        self.inner.images_per_task.observe(images as f64);
        self.inner.active_tasks.inc();
    }

    /// A task reached a terminal state
    pub fn task_finished(&self, policy: ResizePolicy, status: TaskStatus, duration: Duration) {
        let mode = policy.as_str();
        self.inner
            .resize_tasks_total
            .with_label_values(&[mode, status.as_str()])
            .inc();
        if status == TaskStatus::Completed {
            self.inner
                .resize_task_duration_seconds
                .with_label_values(&[mode])
                .observe(duration.as_secs_f64());
        }
        self.inner.active_tasks.dec();
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ResizeError::SerdeError(format!("metrics output was not valid UTF-8: {}", e)))
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            images_uploaded_total: self.inner.images_uploaded_total.get(),
            active_tasks: self.inner.active_tasks.get(),
        }
    }
}
