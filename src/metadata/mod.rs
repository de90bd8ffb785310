//! Container metadata: tag extraction and the metadata heuristics.

pub mod exif;
pub mod text_chunks;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    detection::{AnalysisInput, ForensicModule, ModuleKind, ModuleScore},
    error::Result,
    image_utils::clamp_score,
    metadata::exif::ExifExtractor,
    raster::RasterImage,
};

/// Tags recovered from the original file bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTags {
    pub software: Option<String>,
    /// Free-form text fields: EXIF description/user comment, PNG text, JPEG COM.
    pub comments: Vec<String>,
    pub entries: BTreeMap<String, String>,
}

impl MetadataTags {
    pub fn is_empty(&self) -> bool {
        self.software.is_none() && self.comments.is_empty() && self.entries.is_empty()
    }
}

/// Reads every tag source we understand. `None` means nothing was found or the bytes could not
/// be parsed; both count as "no metadata".
pub fn extract_tags(bytes: &[u8]) -> Option<MetadataTags> {
    let mut tags = MetadataTags::default();

    let has_exif = ExifExtractor::extract_into(bytes, &mut tags);
    let has_text = text_chunks::extract_into(bytes, &mut tags);

    if (has_exif || has_text) && !tags.is_empty() {
        Some(tags)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub missing_metadata_penalty: f64,
    /// Matched case-sensitively as substrings of the software tag.
    pub suspicious_software: Vec<String>,
    pub software_penalty: f64,
    /// Matched case-insensitively as substrings of comment fields.
    pub generation_markers: Vec<String>,
    pub generation_marker_penalty: f64,
    /// Generator output sizes; exact matches and exact doubles both count.
    pub common_resolutions: Vec<(u32, u32)>,
    pub resolution_penalty: f64,
    pub square_min_side: u32,
    pub square_penalty: f64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            missing_metadata_penalty: 0.3,
            suspicious_software: ["Adobe Photoshop", "GIMP", "Stable Diffusion", "Midjourney"]
                .map(String::from)
                .to_vec(),
            software_penalty: 0.4,
            generation_markers: ["steps:", "seed:", "cfg:"].map(String::from).to_vec(),
            generation_marker_penalty: 0.8,
            common_resolutions: vec![
                (512, 512),
                (1024, 1024),
                (512, 768),
                (768, 512),
                (1024, 1792),
                (1792, 1024),
            ],
            resolution_penalty: 0.2,
            square_min_side: 256,
            square_penalty: 0.1,
        }
    }
}

pub struct MetadataInspector {
    config: MetadataConfig,
}

impl MetadataInspector {
    pub fn new() -> Self {
        Self::with_config(MetadataConfig::default())
    }

    pub fn with_config(config: MetadataConfig) -> Self {
        Self { config }
    }

    /// Additive score before clamping, with one diagnostic per rule.
    pub fn raw_score(&self, tags: Option<&MetadataTags>, width: u32, height: u32) -> ModuleScore {
        let cfg = &self.config;
        let mut score = 0.0;

        let has_metadata = tags.is_some_and(|t| !t.is_empty());
        if !has_metadata {
            score += cfg.missing_metadata_penalty;
        }

        let software_match = tags
            .and_then(|t| t.software.as_deref())
            .is_some_and(|sw| cfg.suspicious_software.iter().any(|s| sw.contains(s.as_str())));
        if software_match {
            score += cfg.software_penalty;
        }

        let generation_markers = tags.is_some_and(|t| {
            t.comments.iter().any(|comment| {
                let lower = comment.to_lowercase();
                cfg.generation_markers
                    .iter()
                    .any(|m| lower.contains(&m.to_lowercase()))
            })
        });
        if generation_markers {
            score += cfg.generation_marker_penalty;
        }

        let common_resolution = cfg.common_resolutions.iter().any(|&(w, h)| {
            (width, height) == (w, h) || (width as u64, height as u64) == (w as u64 * 2, h as u64 * 2)
        });
        if common_resolution {
            score += cfg.resolution_penalty;
        }

        let square_large = width == height && width > cfg.square_min_side;
        if square_large {
            score += cfg.square_penalty;
        }

        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        ModuleScore::new(score)
            .with("hasMetadata", flag(has_metadata))
            .with("softwareMatch", flag(software_match))
            .with("generationMarkers", flag(generation_markers))
            .with("commonResolution", flag(common_resolution))
            .with("squareLarge", flag(square_large))
            .with("tagCount", tags.map_or(0, |t| t.entries.len()) as f64)
    }

    pub fn inspect(&self, tags: Option<&MetadataTags>, width: u32, height: u32) -> ModuleScore {
        let mut result = self.raw_score(tags, width, height);
        result.score = clamp_score(result.score);
        result
    }
}

impl Default for MetadataInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ForensicModule for MetadataInspector {
    fn kind(&self) -> ModuleKind {
        ModuleKind::Metadata
    }

    fn score(&self, input: &AnalysisInput<'_>) -> Result<ModuleScore> {
        let tags = extract_tags(input.file_bytes);
        let (width, height) = input.pixels.dimensions();
        let result = self.inspect(tags.as_ref(), width, height);

        log::debug!("metadata score {:.3} ({:?})", result.score, result.diagnostics);
        Ok(result)
    }

    fn visualize(&self, _input: &AnalysisInput<'_>) -> Result<RasterImage> {
        Ok(RasterImage::empty())
    }
}
