use serde::{Deserialize, Serialize};

use crate::{
    ModuleResult,
    codec::Reencoder,
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::{ForensicsError, Result},
    image_utils::{clamp_score, coefficient_of_variation, mean_and_variance},
    raster::{PixelBuffer, RasterImage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElaConfig {
    /// Lossy re-encode quality in `(0, 1]`.
    pub quality: f64,
    pub amplification: f64,
    pub region_variance_threshold: f64,
    pub region_uniform_penalty: f64,
    /// Mean amplified error bands, checked lowest first: `(upper bound, penalty)`.
    pub mean_bands: Vec<(f64, f64)>,
    pub variance_bands: Vec<(f64, f64)>,
    pub high_variance_threshold: f64,
    pub high_variance_bonus: f64,
    pub uniform_cv_threshold: f64,
    pub uniform_cv_penalty: f64,
    pub natural_cv_range: (f64, f64),
    pub natural_cv_bonus: f64,
}

impl Default for ElaConfig {
    fn default() -> Self {
        Self {
            quality: 0.90,
            amplification: 20.0,
            region_variance_threshold: 50.0,
            region_uniform_penalty: 0.3,
            mean_bands: vec![(10.0, 0.9), (20.0, 0.6), (35.0, 0.3)],
            variance_bands: vec![(100.0, 0.6), (300.0, 0.4)],
            high_variance_threshold: 1200.0,
            high_variance_bonus: 0.3,
            uniform_cv_threshold: 0.3,
            uniform_cv_penalty: 0.4,
            natural_cv_range: (0.5, 1.5),
            natural_cv_bonus: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElaStatistics {
    pub mean: f64,
    pub variance: f64,
    pub region_variance: f64,
    pub coefficient_of_variation: f64,
    pub max_level: f64,
}

/// Per-pixel error between the original and its re-encoded copy.
struct ErrorLevels {
    width: u32,
    height: u32,
    /// Amplified per-channel difference, clamped to a byte.
    channels: Vec<[u8; 3]>,
    /// Amplified mean of the three channel differences, clamped to 255.
    levels: Vec<f64>,
}

pub struct ElaAnalyzer<'a> {
    config: ElaConfig,
    reencoder: &'a dyn Reencoder,
}

impl<'a> ElaAnalyzer<'a> {
    pub fn new(reencoder: &'a dyn Reencoder) -> Self {
        Self::with_config(ElaConfig::default(), reencoder)
    }

    pub fn with_config(config: ElaConfig, reencoder: &'a dyn Reencoder) -> Self {
        Self { config, reencoder }
    }

    fn error_levels(&self, pixels: &PixelBuffer) -> Result<ErrorLevels> {
        let recompressed = self.reencoder.reencode(pixels, self.config.quality)?;
        if recompressed.dimensions() != pixels.dimensions() {
            return Err(ForensicsError::Encode(format!(
                "re-encoded image is {:?}, expected {:?}",
                recompressed.dimensions(),
                pixels.dimensions()
            )));
        }

        let (width, height) = pixels.dimensions();
        let amp = self.config.amplification;
        let mut channels = Vec::with_capacity(pixels.pixel_count());
        let mut levels = Vec::with_capacity(pixels.pixel_count());

        for (orig, recomp) in pixels.pixels().zip(recompressed.pixels()) {
            let diff = [0, 1, 2].map(|c| (orig[c] as i32 - recomp[c] as i32).abs() as f64);

            channels.push(diff.map(|d| (d * amp).min(255.0) as u8));
            levels.push(((diff[0] + diff[1] + diff[2]) / 3.0 * amp).min(255.0));
        }

        Ok(ErrorLevels {
            width,
            height,
            channels,
            levels,
        })
    }

    fn statistics(levels: &ErrorLevels) -> ElaStatistics {
        let (mean, variance) = mean_and_variance(&levels.levels);

        let half_w = levels.width / 2;
        let half_h = levels.height / 2;
        let mut sums = [0.0f64; 4];
        let mut counts = [0usize; 4];

        for y in 0..levels.height {
            for x in 0..levels.width {
                let q = (x >= half_w) as usize + 2 * (y >= half_h) as usize;
                sums[q] += levels.levels[(y * levels.width + x) as usize];
                counts[q] += 1;
            }
        }

        let quadrant_means = sums
            .iter()
            .zip(counts.iter())
            .filter(|&(_, &n)| n > 0)
            .map(|(s, &n)| s / n as f64)
            .collect::<Vec<_>>();
        let (_, region_variance) = mean_and_variance(&quadrant_means);

        ElaStatistics {
            mean,
            variance,
            region_variance,
            coefficient_of_variation: coefficient_of_variation(mean, variance),
            max_level: levels.levels.iter().cloned().fold(0.0, f64::max),
        }
    }

    /// Additive score from error statistics, clamped to `[0, 1]`.
    pub fn score_statistics(&self, stats: &ElaStatistics) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;

        if stats.region_variance < cfg.region_variance_threshold {
            score += cfg.region_uniform_penalty;
        }

        if let Some(&(_, penalty)) = cfg.mean_bands.iter().find(|(bound, _)| stats.mean < *bound) {
            score += penalty;
        }

        if let Some(&(_, penalty)) = cfg
            .variance_bands
            .iter()
            .find(|(bound, _)| stats.variance < *bound)
        {
            score += penalty;
        } else if stats.variance > cfg.high_variance_threshold {
            score -= cfg.high_variance_bonus;
        }

        let cv = stats.coefficient_of_variation;
        if cv < cfg.uniform_cv_threshold {
            score += cfg.uniform_cv_penalty;
        } else if cv > cfg.natural_cv_range.0 && cv < cfg.natural_cv_range.1 {
            score -= cfg.natural_cv_bonus;
        }

        ModuleScore::new(clamp_score(score))
            .with("mean", stats.mean)
            .with("variance", stats.variance)
            .with("regionVariance", stats.region_variance)
            .with("coefficientOfVariation", cv)
            .with("maxDifference", stats.max_level)
    }

    fn render(levels: &ErrorLevels) -> Result<RasterImage> {
        let mut raster = RasterImage::try_new("ela", levels.width, levels.height)?;
        for y in 0..levels.height {
            for x in 0..levels.width {
                let [r, g, b] = levels.channels[(y * levels.width + x) as usize];
                raster.put(x, y, [r, g, b, 255]);
            }
        }

        Ok(raster)
    }
}

impl ForensicModule for ElaAnalyzer<'_> {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Ela
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let levels = self.error_levels(input.pixels)?;
        let result = self.score_statistics(&Self::statistics(&levels));

        log::debug!("ela score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        Self::render(&self.error_levels(input.pixels)?)
    }

    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<ModuleResult> {
        let levels = self.error_levels(input.pixels)?;
        let ModuleScore { score, diagnostics } = self.score_statistics(&Self::statistics(&levels));
        log::debug!("ela score {:.3} ({:?})", score, diagnostics);

        Ok(ModuleResult {
            score,
            diagnostics,
            visualization: Self::render(&levels)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns the input untouched, or with the left half brightened by `left_offset`.
    struct FakeReencoder {
        left_offset: u8,
    }

    impl Reencoder for FakeReencoder {
        fn reencode(&self, pixels: &PixelBuffer, _quality: f64) -> Result<PixelBuffer> {
            let w = pixels.width();
            Ok(PixelBuffer::from_fn(w, pixels.height(), |x, y| {
                let [r, g, b] = pixels.rgb(x, y);
                let o = if x < w / 2 { self.left_offset } else { 0 };
                [r.saturating_add(o), g.saturating_add(o), b.saturating_add(o), 255]
            }))
        }
    }

    fn gray(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |_, _| [100, 100, 100, 255])
    }

    fn stats(mean: f64, variance: f64, region_variance: f64) -> ElaStatistics {
        ElaStatistics {
            mean,
            variance,
            region_variance,
            coefficient_of_variation: coefficient_of_variation(mean, variance),
            max_level: 0.0,
        }
    }

    #[test]
    fn test_identical_reencode_scores_max() {
        let reencoder = FakeReencoder { left_offset: 0 };
        let analyzer = ElaAnalyzer::new(&reencoder);
        let pixels = gray(16, 16);
        let input = AnalysisInput {
            pixels: &pixels,
            file_bytes: &[],
        };

        let result = analyzer.analyze(&input).unwrap();
        assert_eq!(result.score, 1.0);
        assert_eq!(result.diagnostics["mean"], 0.0);
        assert_eq!(result.visualization.width, 16);
        assert!(result.visualization.samples.chunks(4).all(|p| p == [0, 0, 0, 255]));
    }

    #[test]
    fn test_half_image_error_is_uneven() {
        let reencoder = FakeReencoder { left_offset: 3 };
        let analyzer = ElaAnalyzer::new(&reencoder);
        let pixels = gray(16, 16);
        let input = AnalysisInput {
            pixels: &pixels,
            file_bytes: &[],
        };

        let result = analyzer.score(&input).unwrap();
        // left half: 3 * 20 = 60, right half: 0
        assert!((result.diagnostics["mean"] - 30.0).abs() < 1e-9);
        assert!((result.diagnostics["variance"] - 900.0).abs() < 1e-9);
        assert!((result.diagnostics["regionVariance"] - 900.0).abs() < 1e-9);
        assert!((result.diagnostics["coefficientOfVariation"] - 1.0).abs() < 1e-9);
        // mean < 35: +0.3, cv in (0.5, 1.5): -0.2
        assert!((result.score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_score_rules() {
        let reencoder = FakeReencoder { left_offset: 0 };
        let analyzer = ElaAnalyzer::new(&reencoder);

        // high, uneven error: variance > 1200 and natural cv pull below zero, clamped
        assert_eq!(analyzer.score_statistics(&stats(60.0, 2500.0, 400.0)).score, 0.0);

        // mean 15 -> +0.6, variance 200 -> +0.4, cv 0.94 -> -0.2
        let s = analyzer.score_statistics(&stats(15.0, 200.0, 100.0)).score;
        assert!((s - 0.8).abs() < 1e-9);

        // uniform quadrants add 0.3
        let s = analyzer.score_statistics(&stats(15.0, 200.0, 10.0)).score;
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_one_pixel_image() {
        let reencoder = FakeReencoder { left_offset: 0 };
        let analyzer = ElaAnalyzer::new(&reencoder);
        let pixels = gray(1, 1);
        let input = AnalysisInput {
            pixels: &pixels,
            file_bytes: &[],
        };

        let result = analyzer.analyze(&input).unwrap();
        assert!((0.0..=1.0).contains(&result.score));
    }
}
