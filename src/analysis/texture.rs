use serde::{Deserialize, Serialize};

use crate::{
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::Result,
    image_utils::{clamp_score, mean_and_variance, pixels_to_gray},
    raster::{PixelBuffer, RasterImage},
};

/// Neighbor offsets, clockwise from top-left; bit `i` of a code is neighbor `i`.
const NEIGHBORS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub min_distinct_patterns: usize,
    pub few_patterns_penalty: f64,
    pub dominant_ratio_threshold: f64,
    pub dominant_penalty: f64,
    pub similarity_block: u32,
    /// Histogram intersection above this fraction of the block area marks a repeat.
    pub similarity_fraction: f64,
    pub repetition_ratio_threshold: f64,
    pub repetition_penalty: f64,
    /// When set, blocks beyond this count are stride-sampled before pairwise comparison.
    /// `None` compares every block pair.
    pub max_similarity_blocks: Option<usize>,
    pub region_size: u32,
    pub smooth_region_variance: f64,
    pub smooth_ratio_threshold: f64,
    pub smooth_penalty: f64,
    pub entropy_threshold: f64,
    pub entropy_penalty: f64,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            min_distinct_patterns: 80,
            few_patterns_penalty: 0.4,
            dominant_ratio_threshold: 0.3,
            dominant_penalty: 0.3,
            similarity_block: 32,
            similarity_fraction: 0.8,
            repetition_ratio_threshold: 0.05,
            repetition_penalty: 0.4,
            max_similarity_blocks: None,
            region_size: 16,
            smooth_region_variance: 500.0,
            smooth_ratio_threshold: 0.4,
            smooth_penalty: 0.3,
            entropy_threshold: 0.4,
            entropy_penalty: 0.3,
        }
    }
}

/// Outcome of the pairwise block comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRepetition {
    /// Non-adjacent block pairs that were compared.
    pub compared: usize,
    pub repetitive: usize,
}

impl BlockRepetition {
    /// Share of compared pairs that repeat; pairs of touching blocks never enter the
    /// denominator.
    pub fn ratio(&self) -> f64 {
        if self.compared == 0 {
            0.0
        } else {
            self.repetitive as f64 / self.compared as f64
        }
    }
}

/// LBP codes of the interior pixels, `(width - 2) x (height - 2)`, row-major.
pub struct LbpMap {
    pub width: u32,
    pub height: u32,
    pub codes: Vec<u8>,
}

impl LbpMap {
    pub fn compute(pixels: &PixelBuffer) -> Self {
        let gray = pixels_to_gray(pixels);
        let (w, h) = gray.dimensions();
        let width = w.saturating_sub(2);
        let height = h.saturating_sub(2);
        let mut codes = Vec::with_capacity((width * height) as usize);

        for y in 1..h.saturating_sub(1) {
            for x in 1..w.saturating_sub(1) {
                let center = gray.get_pixel(x, y)[0];
                let code = NEIGHBORS.iter().enumerate().fold(0u8, |code, (bit, &(dx, dy))| {
                    let n = gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0];
                    if n >= center { code | (1 << bit) } else { code }
                });
                codes.push(code);
            }
        }

        Self {
            width,
            height,
            codes,
        }
    }

    fn histogram(&self, x0: u32, y0: u32, w: u32, h: u32) -> [u32; 256] {
        let mut histogram = [0u32; 256];
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                histogram[self.codes[(y * self.width + x) as usize] as usize] += 1;
            }
        }
        histogram
    }
}

pub struct TextureAnalyzer {
    config: TextureConfig,
}

impl TextureAnalyzer {
    pub fn new() -> Self {
        Self::with_config(TextureConfig::default())
    }

    pub fn with_config(config: TextureConfig) -> Self {
        Self { config }
    }

    /// Compares the LBP histograms of every non-adjacent block pair.
    pub fn block_repetition(&self, map: &LbpMap) -> BlockRepetition {
        let size = self.config.similarity_block.max(1);
        let cols = map.width / size;
        let rows = map.height / size;

        let all = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (c, r)))
            .collect::<Vec<_>>();
        let stride = match self.config.max_similarity_blocks {
            Some(cap) => all.len().div_ceil(cap.max(1)).max(1),
            None => 1,
        };
        let blocks = all
            .into_iter()
            .step_by(stride)
            .map(|(c, r)| ((c, r), map.histogram(c * size, r * size, size, size)))
            .collect::<Vec<_>>();

        let limit = self.config.similarity_fraction * (size * size) as f64;
        let mut pairs = 0usize;
        let mut repetitive = 0usize;

        for i in 0..blocks.len() {
            for j in (i + 1)..blocks.len() {
                let ((c1, r1), h1) = &blocks[i];
                let ((c2, r2), h2) = &blocks[j];
                if c1.abs_diff(*c2) <= 1 && r1.abs_diff(*r2) <= 1 {
                    continue;
                }

                pairs += 1;
                let intersection = h1.iter().zip(h2.iter()).map(|(a, b)| a.min(b)).sum::<u32>();
                if intersection as f64 > limit {
                    repetitive += 1;
                }
            }
        }

        log::trace!("texture: {repetitive}/{pairs} repetitive block pairs");
        BlockRepetition {
            compared: pairs,
            repetitive,
        }
    }

    fn smooth_region_ratio(&self, map: &LbpMap) -> f64 {
        let size = self.config.region_size.max(1);
        let mut regions = 0usize;
        let mut smooth = 0usize;

        for ry in 0..map.height / size {
            for rx in 0..map.width / size {
                let mut values = Vec::with_capacity((size * size) as usize);
                for y in ry * size..(ry + 1) * size {
                    for x in rx * size..(rx + 1) * size {
                        values.push(map.codes[(y * map.width + x) as usize] as f64);
                    }
                }

                regions += 1;
                if mean_and_variance(&values).1 < self.config.smooth_region_variance {
                    smooth += 1;
                }
            }
        }

        if regions == 0 {
            0.0
        } else {
            smooth as f64 / regions as f64
        }
    }

    pub fn score_map(&self, map: &LbpMap) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;

        let histogram = map.histogram(0, 0, map.width, map.height);
        let total = map.codes.len() as f64;

        let distinct = histogram.iter().filter(|&&c| c > 0).count();
        if distinct < cfg.min_distinct_patterns {
            score += cfg.few_patterns_penalty;
        }

        let dominant = histogram.iter().copied().max().unwrap_or(0);
        let dominant_ratio = if total > 0.0 { dominant as f64 / total } else { 0.0 };
        if dominant_ratio > cfg.dominant_ratio_threshold {
            score += cfg.dominant_penalty;
        }

        let repetition = self.block_repetition(map).ratio();
        if repetition > cfg.repetition_ratio_threshold {
            score += cfg.repetition_penalty;
        }

        let smooth_ratio = self.smooth_region_ratio(map);
        if smooth_ratio > cfg.smooth_ratio_threshold {
            score += cfg.smooth_penalty;
        }

        let entropy = if total > 0.0 {
            histogram
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / total;
                    -p * p.log2()
                })
                .sum::<f64>()
                / 8.0
        } else {
            0.0
        };
        if entropy < cfg.entropy_threshold {
            score += cfg.entropy_penalty;
        }

        ModuleScore::new(clamp_score(score))
            .with("textureComplexity", entropy)
            .with("repetitionScore", repetition)
            .with("distinctPatterns", distinct as f64)
            .with("dominantPatternRatio", dominant_ratio)
            .with("smoothRegionRatio", smooth_ratio)
    }

    /// LBP codes as gray levels at their source position; the border stays black.
    fn render(pixels: &PixelBuffer, map: &LbpMap) -> Result<RasterImage> {
        let mut raster = RasterImage::try_new("texture", pixels.width(), pixels.height())?;
        for y in 0..map.height {
            for x in 0..map.width {
                raster.put_gray(x + 1, y + 1, map.codes[(y * map.width + x) as usize]);
            }
        }

        Ok(raster)
    }
}

impl Default for TextureAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for TextureAnalyzer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Texture
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let result = self.score_map(&LbpMap::compute(input.pixels));

        log::debug!("texture score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        Self::render(input.pixels, &LbpMap::compute(input.pixels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(pixels: &PixelBuffer) -> AnalysisInput<'_> {
        AnalysisInput {
            pixels,
            file_bytes: &[],
        }
    }

    fn tiled(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, |x, y| {
            let (tx, ty) = (x % 8, y % 8);
            let v = ((tx * 37 + ty * 91 + tx * ty * 13) % 256) as u8;
            [v, v, v, 255]
        })
    }

    #[test]
    fn test_solid_image_has_one_pattern() {
        let pixels = PixelBuffer::from_fn(64, 64, |_, _| [77, 77, 77, 255]);
        let map = LbpMap::compute(&pixels);
        assert_eq!((map.width, map.height), (62, 62));
        assert!(map.codes.iter().all(|&c| c == 255));

        let result = TextureAnalyzer::new().score(&input(&pixels)).unwrap();
        assert_eq!(result.diagnostics["distinctPatterns"], 1.0);
        assert_eq!(result.diagnostics["textureComplexity"], 0.0);
        assert_eq!(result.diagnostics["smoothRegionRatio"], 1.0);
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn test_lbp_bit_order() {
        // only the right-hand neighbor is brighter than the center
        let pixels = PixelBuffer::from_fn(3, 3, |x, y| match (x, y) {
            (1, 1) => [100, 100, 100, 255],
            (2, 1) => [200, 200, 200, 255],
            _ => [0, 0, 0, 255],
        });
        let map = LbpMap::compute(&pixels);
        assert_eq!(map.codes, vec![1 << 3]);
    }

    #[test]
    fn test_tiled_pattern_is_repetitive() {
        let pixels = tiled(128, 128);
        let result = TextureAnalyzer::new().score(&input(&pixels)).unwrap();
        assert_eq!(result.diagnostics["repetitionScore"], 1.0);
        assert!(result.score >= 0.4);
    }

    #[test]
    fn test_default_compares_every_block() {
        // 6x6 blocks: 630 pairs, 110 of them touching
        let map = LbpMap::compute(&tiled(200, 200));
        let repetition = TextureAnalyzer::new().block_repetition(&map);

        assert_eq!(repetition.compared, 520);
        assert_eq!(repetition.repetitive, 520);
        assert_eq!(repetition.ratio(), 1.0);
    }

    #[test]
    fn test_block_sampling_is_capped() {
        let analyzer = TextureAnalyzer::with_config(TextureConfig {
            max_similarity_blocks: Some(4),
            ..TextureConfig::default()
        });
        let map = LbpMap::compute(&tiled(200, 200));
        // every 9th of 36 blocks: (0,0), (3,1), (0,3), (3,4), none touching
        let repetition = analyzer.block_repetition(&map);
        assert_eq!(repetition.compared, 6);
        assert_eq!(repetition.ratio(), 1.0);
    }

    #[test]
    fn test_mixed_blocks_ratio_is_over_compared_pairs() {
        // left half repeats, right half is noise: 3x3 grid of 32 px blocks
        let pixels = PixelBuffer::from_fn(98, 98, |x, y| {
            let v = if x < 34 {
                ((x % 8) * 37 + (y % 8) * 91) as u8
            } else {
                (x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503)) >> 9) as u8
            };
            [v, v, v, 255]
        });
        let map = LbpMap::compute(&pixels);
        let repetition = TextureAnalyzer::new().block_repetition(&map);

        // 36 pairs, 20 touching
        assert_eq!(repetition.compared, 16);
        assert!(repetition.repetitive >= 1);
        // touching pairs stay out of the denominator
        assert!(repetition.ratio() > repetition.repetitive as f64 / 36.0);
    }

    #[test]
    fn test_visualization_keeps_source_size() {
        let pixels = tiled(40, 24);
        let raster = TextureAnalyzer::new().visualize(&input(&pixels)).unwrap();
        assert_eq!((raster.width, raster.height), (40, 24));
        assert_eq!(raster.get(0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_degenerate_image() {
        let pixels = PixelBuffer::from_fn(1, 5, |_, _| [1, 2, 3, 255]);
        let result = TextureAnalyzer::new().analyze(&input(&pixels)).unwrap();
        assert!((0.0..=1.0).contains(&result.score));
        assert_eq!(result.diagnostics["repetitionScore"], 0.0);
    }
}
