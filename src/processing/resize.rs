//! Resize geometry for the stretch, fit and fill policies

use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResizePolicy;

/// High-quality image resizer applying one of the resize policies
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageResizer {
    filter: FilterType,
}

/// Available resize filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Nearest neighbor (fastest, lowest quality)
    Nearest,
    /// Triangle (linear interpolation)
    Triangle,
    /// Catmull-Rom cubic spline
    CatmullRom,
    /// Gaussian blur
    Gaussian,
    /// Lanczos with radius 3 (high quality, recommended)
    #[default]
    Lanczos3,
}

impl From<FilterType> for imageops::FilterType {
    fn from(filter: FilterType) -> Self {
        match filter {
            FilterType::Nearest => imageops::FilterType::Nearest,
            FilterType::Triangle => imageops::FilterType::Triangle,
            FilterType::CatmullRom => imageops::FilterType::CatmullRom,
            FilterType::Gaussian => imageops::FilterType::Gaussian,
            FilterType::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

impl ImageResizer {
    /// Create a resizer with custom filter
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    /// Resize `image` to exactly `width` x `height` under `policy`.
    ///
    /// `background` is the canvas for fit padding and for compositing
    /// transparent sources under fill.
    pub fn apply(
        &self,
        image: &RgbaImage,
        width: u32,
        height: u32,
        policy: ResizePolicy,
        background: Rgba<u8>,
    ) -> RgbaImage {
        debug!(
            "Resizing {}x{} -> {}x{} ({}, {:?})",
            image.width(),
            image.height(),
            width,
            height,
            policy,
            self.filter
        );

        match policy {
            ResizePolicy::Stretch => self.stretch(image, width, height),
            ResizePolicy::Fit => self.fit(image, width, height, background),
            ResizePolicy::Fill => self.fill(image, width, height, background),
        }
    }

    /// Non-uniform scale to exactly the target dimensions
    pub fn stretch(&self, image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        imageops::resize(image, width, height, self.filter.into())
    }

    /// Scale to fit inside the target and centre on a `background` canvas
    pub fn fit(&self, image: &RgbaImage, width: u32, height: u32, background: Rgba<u8>) -> RgbaImage {
        let (scaled_width, scaled_height) =
            fit_dimensions(image.width(), image.height(), width, height);
        let scaled = self.stretch(image, scaled_width, scaled_height);

        let mut canvas = RgbaImage::from_pixel(width, height, background);
        let x = (width - scaled_width) / 2;
        let y = (height - scaled_height) / 2;
        imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
        canvas
    }

    /// Centre crop to the target aspect ratio, scale to the target, then
    /// composite over `background`
    pub fn fill(&self, image: &RgbaImage, width: u32, height: u32, background: Rgba<u8>) -> RgbaImage {
        let (x, y, crop_width, crop_height) =
            fill_crop(image.width(), image.height(), width, height);
        let cropped = imageops::crop_imm(image, x, y, crop_width, crop_height).to_image();
        let scaled = self.stretch(&cropped, width, height);

        let mut canvas = RgbaImage::from_pixel(width, height, background);
        imageops::overlay(&mut canvas, &scaled, 0, 0);
        canvas
    }
}

/// Dimensions of the source scaled uniformly to fit inside the target.
///
/// Never enlarges the source, never exceeds the target on either axis and
/// never collapses below 1px.
pub fn fit_dimensions(source_width: u32, source_height: u32, width: u32, height: u32) -> (u32, u32) {
    if source_width == 0 || source_height == 0 {
        return (width, height);
    }

    let scale = (width as f64 / source_width as f64)
        .min(height as f64 / source_height as f64)
        .min(1.0);
    let scaled_width = ((source_width as f64 * scale).round() as u32).clamp(1, width);
    let scaled_height = ((source_height as f64 * scale).round() as u32).clamp(1, height);
    (scaled_width, scaled_height)
}

/// Centred region of the source with the target's aspect ratio, as
/// `(x, y, width, height)`.
///
/// The crop is never larger than the source and never below 1px.
pub fn fill_crop(source_width: u32, source_height: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    if source_width == 0 || source_height == 0 || width == 0 || height == 0 {
        return (0, 0, source_width, source_height);
    }

    let (sw, sh) = (u64::from(source_width), u64::from(source_height));
    let (tw, th) = (u64::from(width), u64::from(height));

    let (crop_width, crop_height) = if sw * th > sh * tw {
        // source is wider than the target
        let crop = ((sh * tw + th / 2) / th).clamp(1, sw);
        (crop as u32, source_height)
    } else {
        let crop = ((sw * th + tw / 2) / tw).clamp(1, sh);
        (source_width, crop as u32)
    };

    (
        (source_width - crop_width) / 2,
        (source_height - crop_height) / 2,
        crop_width,
        crop_height,
    )
}
