use std::path::Path;

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{
        color::{ColorAnalyzer, ColorConfig},
        edge::{EdgeAnalyzer, EdgeConfig},
        ela::{ElaAnalyzer, ElaConfig},
        frequency::{FrequencyAnalyzer, FrequencyConfig},
        noise::{NoiseAnalyzer, NoiseConfig},
        texture::{TextureAnalyzer, TextureConfig},
    },
    codec::{ImageDecoder, JpegReencoder, PixelSource, Reencoder, guess_mime_type},
    detection::{
        AnalysisInput, Diagnostics, ForensicModule, ModuleKind,
        aggregator::{Aggregation, Aggregator, AggregatorConfig, Verdict},
    },
    error::{ForensicsError, Result},
    metadata::{MetadataConfig, MetadataInspector},
    raster::{PixelBuffer, RasterImage},
};

pub mod analysis;
pub mod codec;
pub mod detection;
pub mod error;
pub mod image_utils;
pub mod metadata;
pub mod raster;
pub mod report;

/// What happens to the run when one module returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// The first module error aborts the run.
    #[default]
    FailFast,
    /// A failed module contributes a neutral 0.5 score and the run continues.
    Isolate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parallel: bool,
    pub failure_policy: FailurePolicy,
    pub metadata: MetadataConfig,
    pub ela: ElaConfig,
    pub frequency: FrequencyConfig,
    pub color: ColorConfig,
    pub edge: EdgeConfig,
    pub noise: NoiseConfig,
    pub texture: TextureConfig,
    pub aggregator: AggregatorConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            failure_policy: FailurePolicy::default(),
            metadata: MetadataConfig::default(),
            ela: ElaConfig::default(),
            frequency: FrequencyConfig::default(),
            color: ColorConfig::default(),
            edge: EdgeConfig::default(),
            noise: NoiseConfig::default(),
            texture: TextureConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parses a (possibly partial) JSON override; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// File identity, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleResult {
    pub score: f64,
    pub diagnostics: Diagnostics,
    pub visualization: RasterImage,
}

impl ModuleResult {
    /// Stand-in for a module that failed under [`FailurePolicy::Isolate`].
    pub fn failed() -> Self {
        Self {
            score: 0.5,
            diagnostics: Diagnostics::from([("failed".to_string(), 1.0)]),
            visualization: RasterImage::empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleResults {
    pub metadata: ModuleResult,
    pub ela: ModuleResult,
    pub fft: ModuleResult,
    pub color: ModuleResult,
    pub edge: ModuleResult,
    pub noise: ModuleResult,
    pub texture: ModuleResult,
}

impl ModuleResults {
    fn from_results(results: Vec<(ModuleKind, ModuleResult)>) -> Result<Self> {
        let mut slots: [Option<ModuleResult>; ModuleKind::COUNT] = Default::default();
        for (kind, result) in results {
            slots[kind.index()] = Some(result);
        }

        let [metadata, ela, fft, color, edge, noise, texture] = slots;
        let take = |slot: Option<ModuleResult>, kind: ModuleKind| {
            slot.ok_or_else(|| ForensicsError::AnalysisFailed(format!("no result from the {kind} module")))
        };

        Ok(Self {
            metadata: take(metadata, ModuleKind::Metadata)?,
            ela: take(ela, ModuleKind::Ela)?,
            fft: take(fft, ModuleKind::Fft)?,
            color: take(color, ModuleKind::Color)?,
            edge: take(edge, ModuleKind::Edge)?,
            noise: take(noise, ModuleKind::Noise)?,
            texture: take(texture, ModuleKind::Texture)?,
        })
    }

    pub fn get(&self, kind: ModuleKind) -> &ModuleResult {
        match kind {
            ModuleKind::Metadata => &self.metadata,
            ModuleKind::Ela => &self.ela,
            ModuleKind::Fft => &self.fft,
            ModuleKind::Color => &self.color,
            ModuleKind::Edge => &self.edge,
            ModuleKind::Noise => &self.noise,
            ModuleKind::Texture => &self.texture,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModuleKind, &ModuleResult)> {
        ModuleKind::ALL.into_iter().map(|kind| (kind, self.get(kind)))
    }

    pub fn scores(&self) -> [f64; ModuleKind::COUNT] {
        ModuleKind::ALL.map(|kind| self.get(kind).score)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub file: FileInfo,
    pub modules: ModuleResults,
    pub overall_score: f64,
    pub confidence: f64,
    pub verdict: Verdict,
    pub aggregation: Aggregation,
}

impl AnalysisResult {
    pub fn save_visualizations<P: AsRef<Path>>(&self, dir: P) -> Result<Vec<std::path::PathBuf>> {
        let dir = dir.as_ref();
        let mut written = Vec::new();

        for (kind, result) in self.modules.iter() {
            if result.visualization.is_empty() {
                continue;
            }
            let path = dir.join(format!("{kind}.png"));
            result.visualization.save(&path)?;
            written.push(path);
        }

        Ok(written)
    }
}

/// Runs the seven heuristics over one image and aggregates them into a verdict.
pub struct AiImageDetector {
    config: AnalysisConfig,
    pixel_source: Box<dyn PixelSource>,
    reencoder: Box<dyn Reencoder>,
}

impl AiImageDetector {
    pub fn new() -> Self {
        Self {
            config: AnalysisConfig::default(),
            pixel_source: Box::new(ImageDecoder),
            reencoder: Box::new(JpegReencoder),
        }
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pixel_source<S: PixelSource + 'static>(mut self, source: S) -> Self {
        self.pixel_source = Box::new(source);
        self
    }

    pub fn with_reencoder<R: Reencoder + 'static>(mut self, reencoder: R) -> Self {
        self.reencoder = Box::new(reencoder);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Decodes `file_bytes` and analyzes the result. A decode failure aborts the run.
    pub fn analyze(&self, file_bytes: &[u8], file_name: &str, mime_type: &str) -> Result<AnalysisResult> {
        let pixels = self.pixel_source.decode(file_bytes)?;
        debug!(
            "decoded {} ({} bytes) to {}x{}",
            file_name,
            file_bytes.len(),
            pixels.width(),
            pixels.height()
        );

        let file = FileInfo {
            name: file_name.to_string(),
            size: file_bytes.len() as u64,
            mime_type: mime_type.to_string(),
        };
        self.run(file, &pixels, file_bytes)
    }

    pub fn analyze_path<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisResult> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.analyze(&bytes, &name, guess_mime_type(&name))
    }

    /// Analyzes an already-decoded buffer. `file_bytes` feed the metadata module only; the
    /// returned file identity is anonymous.
    pub fn analyze_pixels(&self, pixels: &PixelBuffer, file_bytes: &[u8]) -> Result<AnalysisResult> {
        let file = FileInfo {
            size: file_bytes.len() as u64,
            ..FileInfo::default()
        };
        self.run(file, pixels, file_bytes)
    }

    /// Scores and aggregates without rendering any visualization.
    pub fn score_pixels(&self, pixels: &PixelBuffer, file_bytes: &[u8]) -> Result<Aggregation> {
        Self::check_pixels(pixels)?;
        let input = AnalysisInput { pixels, file_bytes };
        let modules = self.modules();

        let scores = self.dispatch(&modules, |module| {
            let outcome = module.score(&input).map(|s| s.score);
            self.isolate(module.kind(), outcome, || 0.5)
        })?;

        let mut ordered = [0.5; ModuleKind::COUNT];
        for (module, score) in modules.iter().zip(scores) {
            ordered[module.kind().index()] = score;
        }

        Aggregator::with_config(self.config.aggregator.clone()).aggregate(&ordered)
    }

    fn run(&self, file: FileInfo, pixels: &PixelBuffer, file_bytes: &[u8]) -> Result<AnalysisResult> {
        Self::check_pixels(pixels)?;
        let input = AnalysisInput { pixels, file_bytes };
        let modules = self.modules();

        let results = self.dispatch(&modules, |module| {
            let outcome = module.analyze(&input);
            self.isolate(module.kind(), outcome, ModuleResult::failed)
                .map(|result| (module.kind(), result))
        })?;
        let modules = ModuleResults::from_results(results)?;

        let aggregation =
            Aggregator::with_config(self.config.aggregator.clone()).aggregate(&modules.scores())?;

        Ok(AnalysisResult {
            file,
            modules,
            overall_score: aggregation.overall_score,
            confidence: aggregation.confidence,
            verdict: aggregation.verdict,
            aggregation,
        })
    }

    fn check_pixels(pixels: &PixelBuffer) -> Result<()> {
        if pixels.pixel_count() == 0 {
            return Err(ForensicsError::InvalidParameter(format!(
                "image has no pixels ({}x{})",
                pixels.width(),
                pixels.height()
            )));
        }
        Ok(())
    }

    /// The seven modules in [`ModuleKind::ALL`] order.
    fn modules(&self) -> Vec<Box<dyn ForensicModule + '_>> {
        vec![
            Box::new(MetadataInspector::with_config(self.config.metadata.clone())),
            Box::new(ElaAnalyzer::with_config(
                self.config.ela.clone(),
                self.reencoder.as_ref(),
            )),
            Box::new(FrequencyAnalyzer::with_config(self.config.frequency.clone())),
            Box::new(ColorAnalyzer::with_config(self.config.color.clone())),
            Box::new(EdgeAnalyzer::with_config(self.config.edge.clone())),
            Box::new(NoiseAnalyzer::with_config(self.config.noise.clone())),
            Box::new(TextureAnalyzer::with_config(self.config.texture.clone())),
        ]
    }

    /// Applies `f` to every module, in parallel when configured. Output order matches `modules`.
    fn dispatch<T, F>(&self, modules: &[Box<dyn ForensicModule + '_>], f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&dyn ForensicModule) -> Result<T> + Sync + Send,
    {
        if self.config.parallel {
            modules.par_iter().map(|m| f(m.as_ref())).collect()
        } else {
            modules.iter().map(|m| f(m.as_ref())).collect()
        }
    }

    fn isolate<T>(&self, kind: ModuleKind, outcome: Result<T>, neutral: impl FnOnce() -> T) -> Result<T> {
        match outcome {
            Err(e) if self.config.failure_policy == FailurePolicy::Isolate => {
                warn!("{kind} module failed, substituting a neutral score: {e}");
                Ok(neutral())
            }
            other => other,
        }
    }
}

impl Default for AiImageDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{ "parallel": false, "noise": { "block_size": 16 }, "failure_policy": "Isolate" }"#,
        )
        .unwrap();

        assert!(!config.parallel);
        assert_eq!(config.failure_policy, FailurePolicy::Isolate);
        assert_eq!(config.noise.block_size, 16);
        assert_eq!(config.noise.flat_variance, NoiseConfig::default().flat_variance);
        assert_eq!(config.texture, TextureConfig::default());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = AnalysisConfig::default();
        let parsed = AnalysisConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_module_results_require_every_kind() {
        let partial = vec![(ModuleKind::Ela, ModuleResult::failed())];
        assert!(matches!(
            ModuleResults::from_results(partial),
            Err(ForensicsError::AnalysisFailed(_))
        ));

        let full = ModuleKind::ALL
            .iter()
            .rev()
            .map(|&kind| (kind, ModuleResult::failed()))
            .collect();
        let results = ModuleResults::from_results(full).unwrap();
        assert_eq!(results.scores(), [0.5; ModuleKind::COUNT]);
        assert_eq!(results.iter().count(), ModuleKind::COUNT);
    }

    #[test]
    fn test_failed_result_is_neutral() {
        let failed = ModuleResult::failed();
        assert_eq!(failed.score, 0.5);
        assert_eq!(failed.diagnostics["failed"], 1.0);
        assert!(failed.visualization.is_empty());
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        let pixels = PixelBuffer::from_fn(0, 0, |_, _| [0; 4]);
        let err = AiImageDetector::new().analyze_pixels(&pixels, &[]).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));
    }
}
