use image::{GrayImage, Luma};
use statrs::statistics::Statistics;

use crate::raster::PixelBuffer;

#[inline]
pub fn luminance(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}

pub fn pixels_to_gray(pixels: &PixelBuffer) -> GrayImage {
    let (width, height) = pixels.dimensions();
    let mut gray = GrayImage::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let lum = luminance(pixels.rgb(x, y)).round().clamp(0.0, 255.0) as u8;
            gray.put_pixel(x, y, Luma([lum]));
        }
    }

    gray
}

/// Population mean and variance; `(0, 0)` for an empty slice.
pub fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }

    let mean = values.iter().mean();
    let variance = values.iter().population_variance();

    (mean, variance)
}

/// Standard deviation over mean, 0 when the mean is 0.
pub fn coefficient_of_variation(mean: f64, variance: f64) -> f64 {
    if mean == 0.0 {
        0.0
    } else {
        variance.sqrt() / mean
    }
}

/// Maps `values` linearly onto 0..=255 by their maximum. All-zero input maps to zeros.
pub fn normalize_by_max(values: &[f64]) -> Vec<u8> {
    let max = values.iter().cloned().fold(0.0f64, f64::max);
    if max < 1e-10 {
        return vec![0; values.len()];
    }

    values
        .iter()
        .map(|&v| (v / max * 255.0).clamp(0.0, 255.0) as u8)
        .collect()
}

/// Maps `values` linearly onto 0..=255 by their range. Constant input maps to zeros.
pub fn normalize_by_range(values: &[f64]) -> Vec<u8> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    if !range.is_finite() || range < 1e-10 {
        return vec![0; values.len()];
    }

    values
        .iter()
        .map(|&v| ((v - min) / range * 255.0).clamp(0.0, 255.0) as u8)
        .collect()
}

pub fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}
