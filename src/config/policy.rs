//! Resize policies, fill colours and the resize request model

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ResizeError};
use crate::ids::FileId;

/// Largest accepted target width or height
pub const MAX_DIMENSION: u32 = 10_000;

/// Geometric strategy applied to every image of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizePolicy {
    /// Non-uniform scale to exactly the target size
    Stretch,
    /// Uniform scale to fit inside the target, padded on a canvas
    #[default]
    Fit,
    /// Uniform scale to cover the target, centre cropped
    Fill,
}

impl ResizePolicy {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stretch => "stretch",
            Self::Fit => "fit",
            Self::Fill => "fill",
        }
    }

    /// All policies, in declaration order
    pub fn all() -> [ResizePolicy; 3] {
        [Self::Stretch, Self::Fit, Self::Fill]
    }
}

impl fmt::Display for ResizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizePolicy {
    type Err = ResizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stretch" => Ok(Self::Stretch),
            "fit" => Ok(Self::Fit),
            "fill" => Ok(Self::Fill),
            other => Err(ResizeError::invalid_parameters(format!(
                "Unknown resize policy '{}'. Expected one of: stretch, fit, fill",
                other
            ))),
        }
    }
}

/// Opaque RGB canvas colour, written as `#RRGGBB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FillColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl FillColor {
    pub const WHITE: FillColor = FillColor::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Lowercase `#rrggbb` form
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Fully opaque RGBA pixel of this colour
    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }
}

impl fmt::Display for FillColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for FillColor {
    type Err = ResizeError;

    /// Accepts six hex digits with an optional leading `#`
    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim();
        let digits = digits.strip_prefix('#').unwrap_or(digits);

        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ResizeError::invalid_parameters(format!(
                "Fill colour must be a 6-digit hex RGB value like #ff8800, got '{}'",
                s
            )));
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|e| ResizeError::invalid_parameters(format!("Invalid hex digit: {}", e)))
        };

        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl TryFrom<String> for FillColor {
    type Error = ResizeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FillColor> for String {
    fn from(color: FillColor) -> Self {
        color.to_hex()
    }
}

/// How a unit obtains its canvas colour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillSpec {
    /// Caller supplied colour (per-file override or global)
    Explicit(FillColor),
    /// Derive the dominant colour of the source at resize time
    Dominant,
    /// Plain white canvas
    Default,
}

impl FillSpec {
    /// Explicit colour if one was chosen
    pub fn explicit(self) -> Option<FillColor> {
        match self {
            Self::Explicit(color) => Some(color),
            Self::Dominant | Self::Default => None,
        }
    }
}

/// A request to resize a set of uploaded files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub file_ids: Vec<FileId>,
    pub width: u32,
    pub height: u32,
    #[serde(default, alias = "mode")]
    pub policy: ResizePolicy,
    #[serde(default)]
    pub fill_color: Option<FillColor>,
    /// Per-file colour overrides
    #[serde(default)]
    pub fill_colors: HashMap<FileId, FillColor>,
}

impl ResizeRequest {
    /// Create a request with the default policy and no colours
    pub fn new(file_ids: Vec<FileId>, width: u32, height: u32) -> Self {
        Self {
            file_ids,
            width,
            height,
            policy: ResizePolicy::default(),
            fill_color: None,
            fill_colors: HashMap::new(),
        }
    }

    /// Set the resize policy
    pub fn policy(mut self, policy: ResizePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the global fill colour
    pub fn fill_color(mut self, color: FillColor) -> Self {
        self.fill_color = Some(color);
        self
    }

    /// Override the fill colour of one file
    pub fn fill_color_for(mut self, file_id: FileId, color: FillColor) -> Self {
        self.fill_colors.insert(file_id, color);
        self
    }

    /// Canvas colour for one file: per-file override, then global colour,
    /// then (fill only) the dominant source colour, else white.
    pub fn fill_spec_for(&self, file_id: &FileId) -> FillSpec {
        if let Some(color) = self.fill_colors.get(file_id) {
            return FillSpec::Explicit(*color);
        }
        if let Some(color) = self.fill_color {
            return FillSpec::Explicit(color);
        }
        match self.policy {
            ResizePolicy::Fill => FillSpec::Dominant,
            ResizePolicy::Stretch | ResizePolicy::Fit => FillSpec::Default,
        }
    }
}

/// Output naming contract: fixed prefix, original stem, lossless extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNaming {
    pub prefix: &'static str,
    pub extension: &'static str,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self {
            prefix: "resized_",
            extension: "png",
        }
    }
}

impl OutputNaming {
    /// Derive the client-facing filename for an upload's original name
    pub fn derive_filename(&self, original_name: &str) -> String {
        // Only the final component counts, whichever separator the client used
        let base = original_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(original_name);

        let stem = Path::new(base)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("image");

        format!("{}{}.{}", self.prefix, stem, self.extension)
    }
}
