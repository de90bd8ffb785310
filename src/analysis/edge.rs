use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::{
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::Result,
    image_utils::{clamp_score, mean_and_variance, normalize_by_max, pixels_to_gray},
    raster::{PixelBuffer, RasterImage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub strong_threshold: f64,
    pub strong_ratio_threshold: f64,
    pub strong_penalty: f64,
    pub variance_threshold: f64,
    pub variance_penalty: f64,
    /// Magnitude above which a pixel counts as an edge pixel.
    pub edge_threshold: f64,
    /// Maximum orientation difference (radians, modulo pi) for two edge pixels to agree.
    pub coherence_angle: f64,
    /// An edge pixel is coherent when more than this many of its 8 neighbors agree.
    pub coherent_neighbors: usize,
    pub coherence_ratio_threshold: f64,
    pub coherence_penalty: f64,
    pub block_size: u32,
    /// Blocks with fewer edge pixels than this are smooth.
    pub smooth_block_edges: usize,
    pub smooth_ratio_threshold: f64,
    pub smooth_penalty: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            strong_threshold: 150.0,
            strong_ratio_threshold: 0.15,
            strong_penalty: 0.4,
            variance_threshold: 1000.0,
            variance_penalty: 0.3,
            edge_threshold: 50.0,
            coherence_angle: 0.5,
            coherent_neighbors: 6,
            coherence_ratio_threshold: 0.6,
            coherence_penalty: 0.3,
            block_size: 20,
            smooth_block_edges: 5,
            smooth_ratio_threshold: 0.4,
            smooth_penalty: 0.3,
        }
    }
}

/// Sobel magnitude and orientation per pixel; the one-pixel border stays zero.
pub struct GradientField {
    pub width: u32,
    pub height: u32,
    pub magnitude: Vec<f64>,
    pub orientation: Vec<f64>,
}

impl GradientField {
    pub fn sobel(pixels: &PixelBuffer) -> Self {
        let gray = pixels_to_gray(pixels);
        let (width, height) = gray.dimensions();
        let mut magnitude = vec![0.0; (width * height) as usize];
        let mut orientation = vec![0.0; (width * height) as usize];

        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let p = |dx: i32, dy: i32| -> f64 {
                    gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as f64
                };

                let gx = -p(-1, -1) - 2.0 * p(-1, 0) - p(-1, 1) + p(1, -1) + 2.0 * p(1, 0) + p(1, 1);
                let gy = -p(-1, -1) - 2.0 * p(0, -1) - p(1, -1) + p(-1, 1) + 2.0 * p(0, 1) + p(1, 1);

                let i = (y * width + x) as usize;
                magnitude[i] = (gx * gx + gy * gy).sqrt();
                orientation[i] = gy.atan2(gx);
            }
        }

        Self {
            width,
            height,
            magnitude,
            orientation,
        }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }
}

/// Angular distance between two orientations, treating opposite directions as equal.
fn orientation_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % PI;
    d.min(PI - d)
}

pub struct EdgeAnalyzer {
    config: EdgeConfig,
}

impl EdgeAnalyzer {
    pub fn new() -> Self {
        Self::with_config(EdgeConfig::default())
    }

    pub fn with_config(config: EdgeConfig) -> Self {
        Self { config }
    }

    fn coherence_ratio(&self, field: &GradientField) -> f64 {
        let threshold = self.config.edge_threshold;
        let (width, height) = (field.width as i64, field.height as i64);
        let mut edge_pixels = 0usize;
        let mut coherent = 0usize;

        for y in 0..height {
            for x in 0..width {
                let i = field.at(x as u32, y as u32);
                if field.magnitude[i] <= threshold {
                    continue;
                }
                edge_pixels += 1;

                let mut agreeing = 0;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if (dx == 0 && dy == 0) || nx < 0 || ny < 0 || nx >= width || ny >= height {
                            continue;
                        }
                        let j = field.at(nx as u32, ny as u32);
                        if field.magnitude[j] > threshold
                            && orientation_difference(field.orientation[i], field.orientation[j])
                                < self.config.coherence_angle
                        {
                            agreeing += 1;
                        }
                    }
                }

                if agreeing > self.config.coherent_neighbors {
                    coherent += 1;
                }
            }
        }

        if edge_pixels == 0 {
            0.0
        } else {
            coherent as f64 / edge_pixels as f64
        }
    }

    fn smooth_block_ratio(&self, field: &GradientField) -> f64 {
        let size = self.config.block_size.max(1);
        let mut blocks = 0usize;
        let mut smooth = 0usize;

        for by in (0..field.height).step_by(size as usize) {
            for bx in (0..field.width).step_by(size as usize) {
                let mut edges = 0usize;
                for y in by..(by + size).min(field.height) {
                    for x in bx..(bx + size).min(field.width) {
                        if field.magnitude[field.at(x, y)] > self.config.edge_threshold {
                            edges += 1;
                        }
                    }
                }

                blocks += 1;
                if edges < self.config.smooth_block_edges {
                    smooth += 1;
                }
            }
        }

        if blocks == 0 {
            0.0
        } else {
            smooth as f64 / blocks as f64
        }
    }

    pub fn score_field(&self, field: &GradientField) -> ModuleScore {
        let cfg = &self.config;
        let total = field.magnitude.len().max(1) as f64;
        let mut score = 0.0;

        let strong = field
            .magnitude
            .iter()
            .filter(|&&m| m > cfg.strong_threshold)
            .count();
        let strong_ratio = strong as f64 / total;
        if strong_ratio > cfg.strong_ratio_threshold {
            score += cfg.strong_penalty;
        }

        let (avg_strength, variance) = mean_and_variance(&field.magnitude);
        if variance < cfg.variance_threshold {
            score += cfg.variance_penalty;
        }

        let coherence = self.coherence_ratio(field);
        if coherence > cfg.coherence_ratio_threshold {
            score += cfg.coherence_penalty;
        }

        let smooth_ratio = self.smooth_block_ratio(field);
        if smooth_ratio > cfg.smooth_ratio_threshold {
            score += cfg.smooth_penalty;
        }

        let edge_ratio = field
            .magnitude
            .iter()
            .filter(|&&m| m > cfg.edge_threshold.min(cfg.strong_threshold))
            .count() as f64
            / total;

        ModuleScore::new(clamp_score(score))
            .with("avgEdgeStrength", avg_strength)
            .with("edgeRatio", edge_ratio)
            .with("strongEdgeRatio", strong_ratio)
            .with("magnitudeVariance", variance)
            .with("coherenceRatio", coherence)
            .with("smoothBlockRatio", smooth_ratio)
    }

    fn render(field: &GradientField) -> Result<RasterImage> {
        let mut raster = RasterImage::try_new("edge", field.width, field.height)?;
        for (i, v) in normalize_by_max(&field.magnitude).into_iter().enumerate() {
            let x = i as u32 % field.width;
            let y = i as u32 / field.width;
            raster.put_gray(x, y, v);
        }

        Ok(raster)
    }
}

impl Default for EdgeAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for EdgeAnalyzer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Edge
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let result = self.score_field(&GradientField::sobel(input.pixels));

        log::debug!("edge score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        Self::render(&GradientField::sobel(input.pixels))
    }
}
