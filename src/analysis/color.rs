use image::Rgba;
use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};
use serde::{Deserialize, Serialize};

use crate::{
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::Result,
    image_utils::{clamp_score, mean_and_variance},
    raster::{PixelBuffer, RasterImage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// A peak bin must exceed both neighbors by this factor.
    pub peak_neighbor_ratio: f64,
    /// ...and hold at least this fraction of all pixels.
    pub peak_min_fraction: f64,
    pub min_peaks: usize,
    pub few_peaks_penalty: f64,
    pub high_saturation: f64,
    pub high_saturation_penalty: f64,
    pub low_saturation: f64,
    pub low_saturation_penalty: f64,
    pub clip_high: u8,
    pub clip_low: u8,
    pub clipping_ratio_threshold: f64,
    pub clipping_penalty: f64,
    /// Bin-count variance threshold as a multiple of the pixel count.
    pub histogram_variance_factor: f64,
    pub histogram_variance_penalty: f64,
    /// A 3-bin window is too smooth when its variance is below this fraction of its mean.
    pub smooth_window_ratio: f64,
    pub smooth_window_min_mean: f64,
    pub smooth_window_range: (usize, usize),
    pub smooth_window_limit: usize,
    pub smooth_window_penalty: f64,
    pub chart_height: u32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            peak_neighbor_ratio: 1.5,
            peak_min_fraction: 0.02,
            min_peaks: 10,
            few_peaks_penalty: 0.3,
            high_saturation: 180.0,
            high_saturation_penalty: 0.4,
            low_saturation: 30.0,
            low_saturation_penalty: 0.2,
            clip_high: 250,
            clip_low: 5,
            clipping_ratio_threshold: 0.15,
            clipping_penalty: 0.3,
            histogram_variance_factor: 0.5,
            histogram_variance_penalty: 0.2,
            smooth_window_ratio: 0.1,
            smooth_window_min_mean: 10.0,
            smooth_window_range: (10, 245),
            smooth_window_limit: 50,
            smooth_window_penalty: 0.3,
            chart_height: 150,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColorHistograms {
    pub red: [u32; 256],
    pub green: [u32; 256],
    pub blue: [u32; 256],
    pub saturation: [u32; 256],
    pub total: usize,
    pub clipped: usize,
}

impl ColorHistograms {
    /// `clip_low`/`clip_high` bound the "all channels clipped" test.
    pub fn from_pixels(pixels: &PixelBuffer, clip_low: u8, clip_high: u8) -> Self {
        let mut hist = Self {
            red: [0; 256],
            green: [0; 256],
            blue: [0; 256],
            saturation: [0; 256],
            total: pixels.pixel_count(),
            clipped: 0,
        };

        for p in pixels.pixels() {
            let (r, g, b) = (p[0], p[1], p[2]);
            hist.red[r as usize] += 1;
            hist.green[g as usize] += 1;
            hist.blue[b as usize] += 1;
            hist.saturation[hsv_saturation(r, g, b) as usize] += 1;

            if (r >= clip_high && g >= clip_high && b >= clip_high)
                || (r <= clip_low && g <= clip_low && b <= clip_low)
            {
                hist.clipped += 1;
            }
        }

        hist
    }

    fn channels(&self) -> [&[u32; 256]; 3] {
        [&self.red, &self.green, &self.blue]
    }

    fn mean_saturation(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let sum = self
            .saturation
            .iter()
            .enumerate()
            .map(|(level, &count)| level as f64 * count as f64)
            .sum::<f64>();
        sum / self.total as f64
    }
}

/// HSV saturation scaled to 0..=255.
pub fn hsv_saturation(r: u8, g: u8, b: u8) -> u8 {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    if max == 0 {
        0
    } else {
        ((max - min) as f64 / max as f64 * 255.0).round() as u8
    }
}

pub struct ColorAnalyzer {
    config: ColorConfig,
}

impl ColorAnalyzer {
    pub fn new() -> Self {
        Self::with_config(ColorConfig::default())
    }

    pub fn with_config(config: ColorConfig) -> Self {
        Self { config }
    }

    fn count_peaks(&self, histogram: &[u32; 256], total: usize) -> usize {
        let min_count = total as f64 * self.config.peak_min_fraction;
        let ratio = self.config.peak_neighbor_ratio;

        (1..255)
            .filter(|&i| {
                let v = histogram[i] as f64;
                v > histogram[i - 1] as f64 * ratio
                    && v > histogram[i + 1] as f64 * ratio
                    && v > min_count
            })
            .count()
    }

    fn count_smooth_windows(&self, histogram: &[f64; 256]) -> usize {
        let (lo, hi) = self.config.smooth_window_range;
        let lo = lo.max(1);
        let hi = hi.min(254);

        (lo..=hi)
            .filter(|&i| {
                let (mean, variance) = mean_and_variance(&histogram[i - 1..=i + 1]);
                mean > self.config.smooth_window_min_mean
                    && variance < mean * self.config.smooth_window_ratio
            })
            .count()
    }

    pub fn score_histograms(&self, hist: &ColorHistograms) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;
        let total = hist.total.max(1) as f64;

        let peaks = hist
            .channels()
            .iter()
            .map(|h| self.count_peaks(h, hist.total))
            .sum::<usize>();
        if peaks < cfg.min_peaks {
            score += cfg.few_peaks_penalty;
        }

        let avg_saturation = hist.mean_saturation();
        if avg_saturation > cfg.high_saturation {
            score += cfg.high_saturation_penalty;
        } else if avg_saturation < cfg.low_saturation {
            score += cfg.low_saturation_penalty;
        }

        let clipping_ratio = hist.clipped as f64 / total;
        if clipping_ratio > cfg.clipping_ratio_threshold {
            score += cfg.clipping_penalty;
        }

        let histogram_variance = hist
            .channels()
            .iter()
            .map(|h| {
                let counts = h.iter().map(|&c| c as f64).collect::<Vec<_>>();
                mean_and_variance(&counts).1
            })
            .sum::<f64>()
            / 3.0;
        if histogram_variance < cfg.histogram_variance_factor * hist.total as f64 {
            score += cfg.histogram_variance_penalty;
        }

        let combined: [f64; 256] = std::array::from_fn(|i| {
            (hist.red[i] as f64 + hist.green[i] as f64 + hist.blue[i] as f64) / 3.0
        });
        let smooth_windows = self.count_smooth_windows(&combined);
        if smooth_windows > cfg.smooth_window_limit {
            score += cfg.smooth_window_penalty;
        }

        ModuleScore::new(clamp_score(score))
            .with("avgSaturation", avg_saturation)
            .with("clippingRatio", clipping_ratio)
            .with("histogramPeaks", peaks as f64)
            .with("histogramVariance", histogram_variance)
            .with("smoothWindows", smooth_windows as f64)
    }

    fn histograms(&self, pixels: &PixelBuffer) -> ColorHistograms {
        ColorHistograms::from_pixels(pixels, self.config.clip_low, self.config.clip_high)
    }

    /// Three stacked bar charts, red on top, each scaled to its own tallest bin.
    fn render(&self, hist: &ColorHistograms) -> Result<RasterImage> {
        let height = self.config.chart_height.max(3);
        let band = height / 3;
        let mut chart = RasterImage::try_new("color", 256, height)?.into_rgba_image()?;
        let colors = [
            Rgba([255, 60, 60, 255]),
            Rgba([60, 255, 60, 255]),
            Rgba([60, 60, 255, 255]),
        ];

        for (panel, (histogram, color)) in hist.channels().iter().zip(colors).enumerate() {
            let max = histogram.iter().copied().max().unwrap_or(0);
            if max == 0 {
                continue;
            }
            let baseline = (panel as u32 + 1) * band;

            for (bin, &count) in histogram.iter().enumerate() {
                let bar = ((count as f64 / max as f64) * band as f64).round() as u32;
                if bar == 0 {
                    continue;
                }
                let rect = Rect::at(bin as i32, (baseline - bar) as i32).of_size(1, bar);
                draw_filled_rect_mut(&mut chart, rect, color);
            }
        }

        Ok(RasterImage::from_rgba_image(chart))
    }
}

impl Default for ColorAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for ColorAnalyzer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Color
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let result = self.score_histograms(&self.histograms(input.pixels));

        log::debug!("color score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        self.render(&self.histograms(input.pixels))
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

    #[test]
    fn test_hsv_saturation() {
        assert_eq!(hsv_saturation(0, 0, 0), 0);
        assert_eq!(hsv_saturation(200, 200, 200), 0);
        assert_eq!(hsv_saturation(255, 0, 0), 255);
        assert_eq!(hsv_saturation(200, 100, 100), 128);
    }

    #[test]
    fn test_solid_gray_image() {
        let pixels = PixelBuffer::from_fn(32, 32, |_, _| [128, 128, 128, 255]);
        let result = ColorAnalyzer::new().score(&input(&pixels)).unwrap();

        // one peak per channel, zero saturation, a single spike per histogram
        assert_eq!(result.diagnostics["histogramPeaks"], 3.0);
        assert_eq!(result.diagnostics["avgSaturation"], 0.0);
        assert_eq!(result.diagnostics["clippingRatio"], 0.0);
        // few peaks (0.3) + low saturation (0.2); variance of a spike is large
        assert!((result.score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_clipping_and_saturation() {
        // half pure white, half pure red
        let pixels = PixelBuffer::from_fn(20, 20, |x, _| {
            if x < 10 { [255, 255, 255, 255] } else { [255, 0, 0, 255] }
        });
        let result = ColorAnalyzer::new().score(&input(&pixels)).unwrap();

        assert!((result.diagnostics["clippingRatio"] - 0.5).abs() < 1e-12);
        assert!((result.diagnostics["avgSaturation"] - 127.5).abs() < 1e-12);
    }

    #[test]
    fn test_smooth_histogram_windows() {
        let analyzer = ColorAnalyzer::new();
        let flat = [100.0; 256];
        assert_eq!(analyzer.count_smooth_windows(&flat), 236);

        let mut jagged = [0.0; 256];
        for (i, v) in jagged.iter_mut().enumerate() {
            *v = if i % 2 == 0 { 200.0 } else { 20.0 };
        }
        assert_eq!(analyzer.count_smooth_windows(&jagged), 0);
    }

    #[test]
    fn test_chart_dimensions() {
        let pixels = PixelBuffer::from_fn(16, 16, |x, y| [(x * 16) as u8, (y * 16) as u8, 77, 255]);
        let chart = ColorAnalyzer::new().visualize(&input(&pixels)).unwrap();
        assert_eq!((chart.width, chart.height), (256, 150));
        // blue panel has a single full-height bar at bin 77
        assert_eq!(chart.get(77, 149), [60, 60, 255, 255]);
        assert_eq!(chart.get(78, 149), [0, 0, 0, 255]);
    }

    #[test]
    fn test_score_in_range_for_gradient() {
        let pixels = PixelBuffer::from_fn(64, 64, |x, y| [(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8, 255]);
        let result = ColorAnalyzer::new().score(&input(&pixels)).unwrap();
        assert!((0.0..=1.0).contains(&result.score));
    }
}
