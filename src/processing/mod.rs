//! Core image processing functionality

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::config::{FillColor, FillSpec, ResizePolicy};
use crate::ids::OutputId;

pub mod color;
pub mod formats;
pub mod resize;
pub mod validation;

pub use color::*;
pub use formats::*;
pub use resize::*;
pub use validation::*;

/// One file's worth of work inside a task
#[derive(Debug, Clone)]
pub struct ResizeUnit {
    pub output_id: OutputId,
    pub source: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub policy: ResizePolicy,
    pub fill: FillSpec,
}

/// A successfully written output
#[derive(Debug, Clone)]
pub struct UnitOutput {
    pub output_id: OutputId,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub processing_time: Duration,
}

/// A unit that produced no output
#[derive(Debug, Clone, Error)]
#[error("Failed to resize {}: {cause}", path.display())]
pub struct UnitFailure {
    pub path: PathBuf,
    pub cause: String,
}

impl UnitFailure {
    pub fn new<S: Into<String>>(path: &Path, cause: S) -> Self {
        Self {
            path: path.to_path_buf(),
            cause: cause.into(),
        }
    }
}

/// Turns one [`ResizeUnit`] into an output file.
///
/// Implementations run on pool threads and must not touch shared state.
/// Every decode, encode or I/O problem is reported as a [`UnitFailure`].
pub trait UnitResizer: Send + Sync + 'static {
    fn resize(&self, unit: &ResizeUnit) -> std::result::Result<UnitOutput, UnitFailure>;
}

/// Default resizer: decodes with `image`, applies the policy, writes RGBA PNG
#[derive(Debug, Clone, Default)]
pub struct PixelResizer {
    resizer: ImageResizer,
}

impl PixelResizer {
    pub fn new(filter: FilterType) -> Self {
        Self {
            resizer: ImageResizer::with_filter(filter),
        }
    }
}

impl UnitResizer for PixelResizer {
    fn resize(&self, unit: &ResizeUnit) -> std::result::Result<UnitOutput, UnitFailure> {
        let start_time = Instant::now();
        debug!("Processing unit: {:?} -> {:?}", unit.source, unit.output_path);

        let image = image::open(&unit.source)
            .map_err(|e| UnitFailure::new(&unit.source, format!("decode failed: {}", e)))?
            .to_rgba8();

        let background = match unit.fill {
            FillSpec::Explicit(color) => color,
            FillSpec::Dominant => dominant_color(&image),
            FillSpec::Default => FillColor::WHITE,
        };

        let resized = self.resizer.apply(
            &image,
            unit.width,
            unit.height,
            unit.policy,
            background.to_rgba(),
        );

        resized
            .save_with_format(&unit.output_path, OUTPUT_FORMAT)
            .map_err(|e| UnitFailure::new(&unit.source, format!("encode failed: {}", e)))?;

        let file_size = std::fs::metadata(&unit.output_path)
            .map_err(|e| UnitFailure::new(&unit.source, format!("output missing: {}", e)))?
            .len();

        let processing_time = start_time.elapsed();
        debug!(
            "Unit done: {}x{} ({} bytes) in {:?}",
            resized.width(),
            resized.height(),
            file_size,
            processing_time
        );

        Ok(UnitOutput {
            output_id: unit.output_id,
            path: unit.output_path.clone(),
            width: resized.width(),
            height: resized.height(),
            file_size,
            processing_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn unit(dir: &Path, source: PathBuf, policy: ResizePolicy, fill: FillSpec) -> ResizeUnit {
        let output_id = OutputId::new();
        ResizeUnit {
            output_id,
            source,
            output_path: dir.join(format!("{}.png", output_id)),
            width: 100,
            height: 100,
            policy,
            fill,
        }
    }

    #[test]
    fn test_pixel_resizer_writes_png() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("input.png");
        RgbaImage::from_pixel(400, 300, Rgba([200, 10, 10, 255]))
            .save(&source)
            .unwrap();

        let resizer = PixelResizer::new(FilterType::Nearest);
        let unit = unit(dir.path(), source, ResizePolicy::Fit, FillSpec::Default);
        let output = resizer.resize(&unit).unwrap();

        assert_eq!(output.output_id, unit.output_id);
        assert_eq!((output.width, output.height), (100, 100));
        assert!(output.file_size > 0);

        let written = image::open(&output.path).unwrap();
        assert_eq!(written.color(), image::ColorType::Rgba8);
        let written = written.to_rgba8();
        assert_eq!(*written.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        assert_eq!(*written.get_pixel(50, 50), Rgba([200, 10, 10, 255]));
    }

    #[test]
    fn test_explicit_fill_canvas() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("tall.png");
        RgbaImage::from_pixel(10, 40, Rgba([0, 0, 0, 255])).save(&source).unwrap();

        let resizer = PixelResizer::new(FilterType::Nearest);
        let color = FillColor::new(0, 128, 0);
        let unit = unit(dir.path(), source, ResizePolicy::Fit, FillSpec::Explicit(color));
        let output = resizer.resize(&unit).unwrap();

        let written = image::open(&output.path).unwrap().to_rgba8();
        assert_eq!(*written.get_pixel(0, 50), color.to_rgba());
    }

    #[test]
    fn test_undecodable_source_is_unit_failure() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("broken.jpg");
        std::fs::write(&source, b"definitely not a jpeg").unwrap();

        let resizer = PixelResizer::default();
        let unit = unit(dir.path(), source.clone(), ResizePolicy::Stretch, FillSpec::Default);
        let failure = resizer.resize(&unit).unwrap_err();

        assert_eq!(failure.path, source);
        assert!(failure.to_string().contains("broken.jpg"));
        assert!(!unit.output_path.exists());
    }

    #[test]
    fn test_missing_source_is_unit_failure() {
        let dir = TempDir::new().unwrap();
        let resizer = PixelResizer::default();
        let unit = unit(
            dir.path(),
            dir.path().join("gone.png"),
            ResizePolicy::Fill,
            FillSpec::Dominant,
        );
        assert!(resizer.resize(&unit).is_err());
    }
}
