use serde::{Deserialize, Serialize};

use crate::{
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::Result,
    image_utils::{clamp_score, coefficient_of_variation, mean_and_variance, pixels_to_gray},
    raster::{PixelBuffer, RasterImage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub block_size: u32,
    /// Blocks whose RGB variance is below this are flat.
    pub flat_variance: f64,
    pub max_flat_blocks: usize,
    pub very_flat_variance: f64,
    pub clean_noise_threshold: f64,
    pub clean_penalty: f64,
    pub noisy_threshold: f64,
    pub noisy_penalty: f64,
    pub uniform_cv_threshold: f64,
    pub uniform_cv_penalty: f64,
    pub erratic_cv_threshold: f64,
    pub erratic_cv_penalty: f64,
    pub pattern_window: usize,
    /// Two windows match when every sample pair differs by less than this.
    pub pattern_tolerance: f64,
    pub periodic_ratio_threshold: f64,
    pub periodic_penalty: f64,
    pub very_flat_ratio_threshold: f64,
    pub very_flat_penalty: f64,
    pub laplacian_amplification: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            block_size: 8,
            flat_variance: 100.0,
            max_flat_blocks: 50,
            very_flat_variance: 5.0,
            clean_noise_threshold: 1.5,
            clean_penalty: 0.5,
            noisy_threshold: 15.0,
            noisy_penalty: 0.2,
            uniform_cv_threshold: 0.3,
            uniform_cv_penalty: 0.3,
            erratic_cv_threshold: 2.0,
            erratic_cv_penalty: 0.2,
            pattern_window: 4,
            pattern_tolerance: 1.0,
            periodic_ratio_threshold: 0.1,
            periodic_penalty: 0.4,
            very_flat_ratio_threshold: 0.3,
            very_flat_penalty: 0.3,
            laplacian_amplification: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FlatBlock {
    x: u32,
    y: u32,
    variance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseStatistics {
    pub flat_blocks: usize,
    pub very_flat_blocks: usize,
    pub samples: Vec<f64>,
}

pub struct NoiseAnalyzer {
    config: NoiseConfig,
}

impl NoiseAnalyzer {
    pub fn new() -> Self {
        Self::with_config(NoiseConfig::default())
    }

    pub fn with_config(config: NoiseConfig) -> Self {
        Self { config }
    }

    /// Mean of the three per-channel variances inside one block.
    fn block_rgb_variance(pixels: &PixelBuffer, bx: u32, by: u32, size: u32) -> f64 {
        let mut channels: [Vec<f64>; 3] = Default::default();
        for y in by..by + size {
            for x in bx..bx + size {
                let rgb = pixels.rgb(x, y);
                for (channel, &value) in channels.iter_mut().zip(rgb.iter()) {
                    channel.push(value as f64);
                }
            }
        }

        channels.iter().map(|v| mean_and_variance(v).1).sum::<f64>() / 3.0
    }

    fn find_flat_blocks(&self, pixels: &PixelBuffer) -> Vec<FlatBlock> {
        let size = self.config.block_size.max(2);
        let (width, height) = pixels.dimensions();
        let mut blocks = Vec::new();

        'scan: for by in (0..height.saturating_sub(size - 1)).step_by(size as usize) {
            for bx in (0..width.saturating_sub(size - 1)).step_by(size as usize) {
                let variance = Self::block_rgb_variance(pixels, bx, by, size);
                if variance < self.config.flat_variance {
                    blocks.push(FlatBlock { x: bx, y: by, variance });
                    if blocks.len() >= self.config.max_flat_blocks {
                        break 'scan;
                    }
                }
            }
        }

        blocks
    }

    /// Horizontal and vertical neighbor differences inside flat blocks, in scan order.
    pub fn statistics(&self, pixels: &PixelBuffer) -> NoiseStatistics {
        let size = self.config.block_size.max(2);
        let blocks = self.find_flat_blocks(pixels);
        let gray = |x: u32, y: u32| {
            let [r, g, b] = pixels.rgb(x, y);
            (r as f64 + g as f64 + b as f64) / 3.0
        };

        let mut samples = Vec::with_capacity(blocks.len() * (size * size * 2) as usize);
        for block in &blocks {
            for y in block.y..block.y + size {
                for x in block.x..block.x + size {
                    let center = gray(x, y);
                    if x + 1 < block.x + size {
                        samples.push((gray(x + 1, y) - center).abs());
                    }
                    if y + 1 < block.y + size {
                        samples.push((gray(x, y + 1) - center).abs());
                    }
                }
            }
        }

        let very_flat_blocks = blocks
            .iter()
            .filter(|b| b.variance < self.config.very_flat_variance)
            .count();
        log::trace!(
            "noise: {} flat blocks ({} very flat), {} samples",
            blocks.len(),
            very_flat_blocks,
            samples.len()
        );

        NoiseStatistics {
            flat_blocks: blocks.len(),
            very_flat_blocks,
            samples,
        }
    }

    /// Number of windows that nearly repeat the window right after them.
    fn periodic_matches(&self, samples: &[f64]) -> usize {
        let w = self.config.pattern_window.max(1);
        if samples.len() < 2 * w {
            return 0;
        }

        (0..=samples.len() - 2 * w)
            .step_by(w)
            .filter(|&i| {
                samples[i..i + w]
                    .iter()
                    .zip(&samples[i + w..i + 2 * w])
                    .all(|(a, b)| (a - b).abs() < self.config.pattern_tolerance)
            })
            .count()
    }

    pub fn score_statistics(&self, stats: &NoiseStatistics) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;

        let (avg_noise, variance) = mean_and_variance(&stats.samples);
        let cv = coefficient_of_variation(avg_noise, variance);

        // without flat regions there is nothing to measure noise on
        if !stats.samples.is_empty() {
            if avg_noise < cfg.clean_noise_threshold {
                score += cfg.clean_penalty;
            } else if avg_noise > cfg.noisy_threshold {
                score += cfg.noisy_penalty;
            }

            if cv < cfg.uniform_cv_threshold {
                score += cfg.uniform_cv_penalty;
            } else if cv > cfg.erratic_cv_threshold {
                score += cfg.erratic_cv_penalty;
            }
        }

        let periodic_ratio = if stats.samples.is_empty() {
            0.0
        } else {
            self.periodic_matches(&stats.samples) as f64 / stats.samples.len() as f64
        };
        if periodic_ratio > cfg.periodic_ratio_threshold {
            score += cfg.periodic_penalty;
        }

        let very_flat_ratio = if stats.flat_blocks == 0 {
            0.0
        } else {
            stats.very_flat_blocks as f64 / stats.flat_blocks as f64
        };
        if very_flat_ratio > cfg.very_flat_ratio_threshold {
            score += cfg.very_flat_penalty;
        }

        ModuleScore::new(clamp_score(score))
            .with("avgNoise", avg_noise)
            .with("noiseVariance", variance)
            .with("noiseConsistency", 1.0 - cv)
            .with("periodicRatio", periodic_ratio)
            .with("flatBlocks", stats.flat_blocks as f64)
            .with("veryFlatRatio", very_flat_ratio)
    }

    /// Absolute 4-neighbor Laplacian, amplified.
    fn render(&self, pixels: &PixelBuffer) -> Result<RasterImage> {
        let gray = pixels_to_gray(pixels);
        let (width, height) = gray.dimensions();
        let mut raster = RasterImage::try_new("noise", width, height)?;

        for y in 1..height.saturating_sub(1) {
            for x in 1..width.saturating_sub(1) {
                let p = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
                let laplacian =
                    4.0 * p(x, y) - p(x - 1, y) - p(x + 1, y) - p(x, y - 1) - p(x, y + 1);
                let v = (laplacian.abs() * self.config.laplacian_amplification).min(255.0) as u8;
                raster.put_gray(x, y, v);
            }
        }

        Ok(raster)
    }
}

impl Default for NoiseAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for NoiseAnalyzer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Noise
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let result = self.score_statistics(&self.statistics(input.pixels));

        log::debug!("noise score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        self.render(input.pixels)
    }
}
