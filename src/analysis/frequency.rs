use std::f64::consts::FRAC_PI_2;

use image::imageops::{self, FilterType};
use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::{
    ModuleResult,
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::{ForensicsError, Result},
    image_utils::{clamp_score, normalize_by_range, pixels_to_gray},
    raster::{PixelBuffer, RasterImage},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Side of the square, power-of-two grid the image is resized to.
    pub size: u32,
    /// Radius bounds of the low and mid bands as fractions of `size`.
    pub low_band_fraction: f64,
    pub mid_band_fraction: f64,
    pub dc_exclusion_radius: f64,
    /// Peaks must exceed this fraction of the spectrum maximum.
    pub peak_fraction: f64,
    pub max_peaks: usize,
    pub symmetry_tolerance: f64,
    pub radius_tolerance: f64,
    pub angle_tolerance: f64,
    /// Corner block side as a fraction of `size`, capped at half the grid.
    pub corner_fraction: f64,

    pub smooth_low_ratio: f64,
    pub smooth_penalty: f64,
    pub unusual_low_ratio: f64,
    pub unusual_penalty: f64,
    pub high_ratio_threshold: f64,
    pub high_ratio_penalty: f64,
    pub many_pairs_threshold: usize,
    pub many_pairs_penalty: f64,
    pub few_pairs_penalty: f64,
    pub corner_ratio_threshold: f64,
    pub corner_penalty: f64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            size: 512,
            low_band_fraction: 1.0 / 8.0,
            mid_band_fraction: 1.0 / 4.0,
            dc_exclusion_radius: 5.0,
            peak_fraction: 0.7,
            max_peaks: 64,
            symmetry_tolerance: 2.0,
            radius_tolerance: 2.0,
            angle_tolerance: 0.1,
            corner_fraction: 1.0 / 16.0,
            smooth_low_ratio: 0.95,
            smooth_penalty: 0.5,
            unusual_low_ratio: 0.7,
            unusual_penalty: 0.2,
            high_ratio_threshold: 0.15,
            high_ratio_penalty: 0.4,
            many_pairs_threshold: 3,
            many_pairs_penalty: 0.5,
            few_pairs_penalty: 0.2,
            corner_ratio_threshold: 0.05,
            corner_penalty: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeak {
    pub x: usize,
    pub y: usize,
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumStatistics {
    pub low_ratio: f64,
    pub mid_ratio: f64,
    pub high_ratio: f64,
    pub peak_count: usize,
    pub peak_pairs: usize,
    pub corner_ratio: f64,
}

pub struct FrequencyAnalyzer {
    config: FrequencyConfig,
}

impl FrequencyAnalyzer {
    pub fn new() -> Self {
        Self::with_config(FrequencyConfig::default())
    }

    pub fn with_config(config: FrequencyConfig) -> Self {
        Self { config }
    }

    /// Centered log-magnitude spectrum of the resized grayscale image.
    pub fn spectrum(&self, pixels: &PixelBuffer) -> Result<Array2<f64>> {
        let size = self.config.size;
        if size < 8 || !size.is_power_of_two() {
            return Err(ForensicsError::InvalidParameter(format!(
                "FFT size must be a power of two >= 8, got {size}"
            )));
        }
        if pixels.pixel_count() == 0 {
            return Err(ForensicsError::AnalysisFailed("empty image".into()));
        }

        let gray = pixels_to_gray(pixels);
        let resized = if gray.dimensions() == (size, size) {
            gray
        } else {
            imageops::resize(&gray, size, size, FilterType::Triangle)
        };

        let n = size as usize;
        let mut data = Array2::from_shape_fn((n, n), |(y, x)| {
            Complex::new(resized.get_pixel(x as u32, y as u32)[0] as f64, 0.0)
        });

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);

        for mut row in data.rows_mut() {
            let mut line = row.to_vec();
            fft.process(&mut line);
            row.iter_mut().zip(line).for_each(|(dst, v)| *dst = v);
        }

        for mut column in data.columns_mut() {
            let mut line = column.to_vec();
            fft.process(&mut line);
            column.iter_mut().zip(line).for_each(|(dst, v)| *dst = v);
        }

        let half = n / 2;
        Ok(Array2::from_shape_fn((n, n), |(y, x)| {
            (1.0 + data[[(y + half) % n, (x + half) % n]].norm()).ln()
        }))
    }

    pub fn statistics(&self, spectrum: &Array2<f64>) -> SpectrumStatistics {
        let cfg = &self.config;
        let n = spectrum.nrows();
        let center = (n / 2) as f64;
        let low_radius = n as f64 * cfg.low_band_fraction;
        let mid_radius = n as f64 * cfg.mid_band_fraction;

        let (mut low, mut mid, mut high) = (0.0, 0.0, 0.0);
        for ((y, x), &v) in spectrum.indexed_iter() {
            let r = (x as f64 - center).hypot(y as f64 - center);
            if r < low_radius {
                low += v;
            } else if r < mid_radius {
                mid += v;
            } else {
                high += v;
            }
        }
        let total = low + mid + high;
        let ratio = |part: f64| if total > 0.0 { part / total } else { 0.0 };

        // four corners at most tile the grid
        let block = ((n as f64 * cfg.corner_fraction) as usize).min(n / 2).max(1);
        let mut corner = 0.0;
        for (y0, x0) in [(0, 0), (0, n - block), (n - block, 0), (n - block, n - block)] {
            for y in y0..y0 + block {
                for x in x0..x0 + block {
                    corner += spectrum[[y, x]];
                }
            }
        }

        let peaks = self.find_peaks(spectrum);
        let peak_pairs = self.count_peak_pairs(&peaks, center);

        SpectrumStatistics {
            low_ratio: ratio(low),
            mid_ratio: ratio(mid),
            high_ratio: ratio(high),
            peak_count: peaks.len(),
            peak_pairs,
            corner_ratio: ratio(corner),
        }
    }

    /// Strict local maxima above the peak threshold, outside the DC neighborhood, strongest
    /// first and capped at `max_peaks`.
    pub fn find_peaks(&self, spectrum: &Array2<f64>) -> Vec<SpectralPeak> {
        let (rows, cols) = spectrum.dim();
        if rows < 3 || cols < 3 {
            return Vec::new();
        }

        let max = spectrum.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let threshold = max * self.config.peak_fraction;
        let center = (rows / 2) as f64;
        let mut peaks = Vec::new();

        for y in 1..rows - 1 {
            for x in 1..cols - 1 {
                let v = spectrum[[y, x]];
                if v <= threshold {
                    continue;
                }
                if (x as f64 - center).hypot(y as f64 - center) <= self.config.dc_exclusion_radius {
                    continue;
                }

                let is_peak = (-1i32..=1).all(|dy| {
                    (-1i32..=1).all(|dx| {
                        (dx == 0 && dy == 0)
                            || v > spectrum[[(y as i32 + dy) as usize, (x as i32 + dx) as usize]]
                    })
                });
                if is_peak {
                    peaks.push(SpectralPeak { x, y, magnitude: v });
                }
            }
        }

        peaks.sort_by(|a, b| {
            b.magnitude
                .total_cmp(&a.magnitude)
                .then((a.y, a.x).cmp(&(b.y, b.x)))
        });
        peaks.truncate(self.config.max_peaks);
        log::trace!("fft: {} spectral peaks above {:.2}", peaks.len(), threshold);

        peaks
    }

    /// Pairs mirrored through the center, or at equal radius with a 90-degree-multiple angular
    /// offset.
    pub fn count_peak_pairs(&self, peaks: &[SpectralPeak], center: f64) -> usize {
        let cfg = &self.config;
        let polar = peaks
            .iter()
            .map(|p| {
                let dx = p.x as f64 - center;
                let dy = p.y as f64 - center;
                (dx, dy, dx.hypot(dy), dy.atan2(dx))
            })
            .collect::<Vec<_>>();

        let mut pairs = 0;
        for i in 0..polar.len() {
            for j in (i + 1)..polar.len() {
                let (dx1, dy1, r1, a1) = polar[i];
                let (dx2, dy2, r2, a2) = polar[j];

                let symmetric = (dx1 + dx2).abs() <= cfg.symmetry_tolerance
                    && (dy1 + dy2).abs() <= cfg.symmetry_tolerance;

                let offset = (a1 - a2).abs().rem_euclid(FRAC_PI_2);
                let grid = (r1 - r2).abs() <= cfg.radius_tolerance
                    && offset.min(FRAC_PI_2 - offset) <= cfg.angle_tolerance;

                if symmetric || grid {
                    pairs += 1;
                }
            }
        }

        pairs
    }

    pub fn score_statistics(&self, stats: &SpectrumStatistics) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;

        if stats.low_ratio > cfg.smooth_low_ratio {
            score += cfg.smooth_penalty;
        } else if stats.low_ratio < cfg.unusual_low_ratio {
            score += cfg.unusual_penalty;
        }

        if stats.high_ratio > cfg.high_ratio_threshold {
            score += cfg.high_ratio_penalty;
        }

        if stats.peak_pairs > cfg.many_pairs_threshold {
            score += cfg.many_pairs_penalty;
        } else if stats.peak_pairs > 0 {
            score += cfg.few_pairs_penalty;
        }

        if stats.corner_ratio > cfg.corner_ratio_threshold {
            score += cfg.corner_penalty;
        }

        ModuleScore::new(clamp_score(score))
            .with("lowFrequencyRatio", stats.low_ratio)
            .with("midFrequencyRatio", stats.mid_ratio)
            .with("highFrequencyRatio", stats.high_ratio)
            .with("peakCount", stats.peak_count as f64)
            .with("symmetricPeakPairs", stats.peak_pairs as f64)
            .with("cornerEnergyRatio", stats.corner_ratio)
    }

    fn render(spectrum: &Array2<f64>) -> Result<RasterImage> {
        let (rows, cols) = spectrum.dim();
        let values = spectrum.iter().cloned().collect::<Vec<_>>();
        let normalized = normalize_by_range(&values);

        let mut raster = RasterImage::try_new("fft", cols as u32, rows as u32)?;
        for (i, v) in normalized.into_iter().enumerate() {
            raster.put_gray((i % cols) as u32, (i / cols) as u32, v);
        }

        Ok(raster)
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for FrequencyAnalyzer {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Fft
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let spectrum = self.spectrum(input.pixels)?;
        let result = self.score_statistics(&self.statistics(&spectrum));

        log::debug!("fft score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage> {
        Self::render(&self.spectrum(input.pixels)?)
    }

    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<ModuleResult> {
        let spectrum = self.spectrum(input.pixels)?;
        let ModuleScore { score, diagnostics } = self.score_statistics(&self.statistics(&spectrum));
        log::debug!("fft score {:.3} ({:?})", score, diagnostics);

        Ok(ModuleResult {
            score,
            diagnostics,
            visualization: Self::render(&spectrum)?,
        })
    }
}
