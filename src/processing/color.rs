//! Dominant colour extraction for the fill canvas

use std::collections::HashMap;

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::config::FillColor;

/// Edge length of the downsampled grid the colour histogram is taken from
pub const SAMPLE_SIZE: u32 = 50;

/// Most frequent colour of an exact 50x50 nearest-neighbour sample of `image`.
///
/// Ties go to the colour seen first in row-major scan order. Fully
/// transparent pixels do not vote; an image with no visible pixels yields
/// opaque white.
pub fn dominant_color(image: &RgbaImage) -> FillColor {
    if image.width() == 0 || image.height() == 0 {
        return FillColor::WHITE;
    }

    let sample = imageops::resize(image, SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Nearest);

    // colour -> (count, first seen)
    let mut histogram: HashMap<[u8; 3], (u32, usize)> = HashMap::new();
    for (index, pixel) in sample.pixels().enumerate() {
        let [r, g, b, a] = pixel.0;
        if a == 0 {
            continue;
        }
        histogram
            .entry([r, g, b])
            .or_insert((0, index))
            .0 += 1;
    }

    histogram
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|([r, g, b], _)| FillColor::new(r, g, b))
        .unwrap_or(FillColor::WHITE)
}
