pub mod aggregator;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{ModuleResult, error::Result, raster::{PixelBuffer, RasterImage}};

/// Named per-module metrics, ordered by name.
pub type Diagnostics = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Metadata,
    Ela,
    Fft,
    Color,
    Edge,
    Noise,
    Texture,
}

impl ModuleKind {
    pub const COUNT: usize = 7;

    pub const ALL: [ModuleKind; Self::COUNT] = [
        ModuleKind::Metadata,
        ModuleKind::Ela,
        ModuleKind::Fft,
        ModuleKind::Color,
        ModuleKind::Edge,
        ModuleKind::Noise,
        ModuleKind::Texture,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ModuleKind::Metadata => "metadata",
            ModuleKind::Ela => "ela",
            ModuleKind::Fft => "fft",
            ModuleKind::Color => "color",
            ModuleKind::Edge => "edge",
            ModuleKind::Noise => "noise",
            ModuleKind::Texture => "texture",
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What every module reads. Both fields are shared, immutable views.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub pixels: &'a PixelBuffer,
    pub file_bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModuleScore {
    pub score: f64,
    pub diagnostics: Diagnostics,
}

impl ModuleScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.diagnostics.insert(name.to_string(), value);
        self
    }
}

/// One independent heuristic over the decoded image.
///
/// Implementations must not mutate their input or depend on another module's output, so any
/// scheduling of modules yields the same results.
pub trait ForensicModule: Send + Sync {
    fn kind(&self) -> ModuleKind;

    /// Score in `[0, 1]` plus diagnostics, without building a visualization.
    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore>;

    fn visualize(&self, input: &AnalysisInput<'_>) -> Result<RasterImage>;

    fn analyze(&self, input: &AnalysisInput<'_>) -> Result<ModuleResult> {
        let ModuleScore { score, diagnostics } = self.score(input)?;
        let visualization = self.visualize(input)?;

        Ok(ModuleResult {
            score,
            diagnostics,
            visualization,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_matches_index() {
        for (i, kind) in ModuleKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ModuleKind::Fft).unwrap(), "\"fft\"");
    }
}
