//! End-to-end runs of the detector over encoded files.

use std::io::Cursor;

use ai_image_forensics::{
    AiImageDetector, AnalysisConfig, FailurePolicy,
    codec::Reencoder,
    detection::{ModuleKind, aggregator::Verdict},
    error::{ForensicsError, Result},
    raster::PixelBuffer,
    report::JsonReport,
};
use image::{ImageFormat, codecs::jpeg::JpegEncoder};
use tempfile::TempDir;

fn textured(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::from_fn(width, height, |x, y| {
        let h = x.wrapping_mul(2_654_435_761).wrapping_add(y.wrapping_mul(40_503)) >> 7;
        let v = (h % 256) as u8;
        [v, v.wrapping_add((x * 3) as u8), v.wrapping_sub((y * 5) as u8), 255]
    })
}

fn encode_png(pixels: &PixelBuffer) -> Vec<u8> {
    let image = pixels.to_rgba_image().unwrap();
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// JPEG bytes with a `COM` segment right after SOI.
fn encode_jpeg_with_comment(pixels: &PixelBuffer, comment: &str) -> Vec<u8> {
    let rgb = image::DynamicImage::ImageRgba8(pixels.to_rgba_image().unwrap()).to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, 92)
        .encode_image(&rgb)
        .unwrap();

    let len = (comment.len() + 2) as u16;
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, 0xFE]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(comment.as_bytes());
    out.extend_from_slice(&jpeg[2..]);
    out
}

struct FailingReencoder;

impl Reencoder for FailingReencoder {
    fn reencode(&self, _pixels: &PixelBuffer, _quality: f64) -> Result<PixelBuffer> {
        Err(ForensicsError::Encode("codec unavailable".into()))
    }
}

fn sequential() -> AnalysisConfig {
    AnalysisConfig {
        parallel: false,
        ..AnalysisConfig::default()
    }
}

#[test]
fn uniform_png_on_disk_looks_synthetic() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("flat.png");
    let pixels = PixelBuffer::from_fn(64, 64, |_, _| [128, 128, 128, 255]);
    std::fs::write(&path, encode_png(&pixels)).unwrap();

    let result = AiImageDetector::new().analyze_path(&path).unwrap();

    assert_eq!(result.file.name, "flat.png");
    assert_eq!(result.file.mime_type, "image/png");
    assert_eq!(result.file.size, std::fs::metadata(&path).unwrap().len());

    assert!(result.modules.noise.score >= 0.5);
    assert!(result.modules.edge.score >= 0.5);
    assert!(result.modules.texture.score >= 0.5);
    assert_eq!(result.modules.metadata.diagnostics["hasMetadata"], 0.0);
}

#[test]
fn every_score_is_in_range() {
    let pixels = textured(96, 80);
    let bytes = encode_png(&pixels);
    let result = AiImageDetector::new()
        .analyze(&bytes, "textured.png", "image/png")
        .unwrap();

    for (kind, module) in result.modules.iter() {
        assert!((0.0..=1.0).contains(&module.score), "{kind} = {}", module.score);
    }
    assert!((0.0..=1.0).contains(&result.overall_score));
    assert!((0.0..=1.0).contains(&result.confidence));
    assert_eq!(result.verdict, result.aggregation.verdict);
}

#[test]
fn repeated_runs_are_identical() {
    let bytes = encode_png(&textured(72, 72));
    let detector = AiImageDetector::new();

    let first = detector.analyze(&bytes, "a.png", "image/png").unwrap();
    let second = detector.analyze(&bytes, "a.png", "image/png").unwrap();
    assert_eq!(first, second);
}

#[test]
fn parallel_and_sequential_agree() {
    let bytes = encode_png(&textured(80, 64));

    let parallel = AiImageDetector::new()
        .analyze(&bytes, "a.png", "image/png")
        .unwrap();
    let serial = AiImageDetector::new()
        .with_config(sequential())
        .analyze(&bytes, "a.png", "image/png")
        .unwrap();

    assert_eq!(parallel, serial);
}

#[test]
fn undecodable_bytes_abort_the_run() {
    let err = AiImageDetector::new()
        .analyze(b"this is not a valid image file", "corrupt.jpg", "image/jpeg")
        .unwrap_err();
    assert!(matches!(err, ForensicsError::Decode(_)));
}

#[test]
fn generation_comment_in_jpeg_is_flagged() {
    let pixels = textured(64, 48);
    let bytes = encode_jpeg_with_comment(&pixels, "a castle, Steps: 30, Seed: 1234, CFG: 7");

    let result = AiImageDetector::new()
        .analyze(&bytes, "render.jpg", "image/jpeg")
        .unwrap();
    let metadata = &result.modules.metadata;

    assert_eq!(metadata.diagnostics["hasMetadata"], 1.0);
    assert_eq!(metadata.diagnostics["generationMarkers"], 1.0);
    assert!(metadata.score >= 0.8);
    assert!(metadata.visualization.is_empty());
}

#[test]
fn failing_module_aborts_by_default() {
    let bytes = encode_png(&textured(48, 48));
    let err = AiImageDetector::new()
        .with_reencoder(FailingReencoder)
        .analyze(&bytes, "a.png", "image/png")
        .unwrap_err();
    assert!(matches!(err, ForensicsError::Encode(_)));
}

#[test]
fn failing_module_can_be_isolated() {
    let bytes = encode_png(&textured(48, 48));
    let config = AnalysisConfig {
        failure_policy: FailurePolicy::Isolate,
        ..AnalysisConfig::default()
    };
    let result = AiImageDetector::new()
        .with_config(config)
        .with_reencoder(FailingReencoder)
        .analyze(&bytes, "a.png", "image/png")
        .unwrap();

    assert_eq!(result.modules.ela.score, 0.5);
    assert_eq!(result.modules.ela.diagnostics["failed"], 1.0);
    assert!(result.modules.ela.visualization.is_empty());
    assert!(!result.modules.noise.diagnostics.contains_key("failed"));
}

#[test]
fn visualizations_export_as_png() {
    let temp_dir = TempDir::new().unwrap();
    let pixels = textured(64, 64);
    let result = AiImageDetector::new()
        .with_config(sequential())
        .analyze_pixels(&pixels, &[])
        .unwrap();

    let written = result.save_visualizations(temp_dir.path()).unwrap();
    // metadata has nothing to draw
    assert_eq!(written.len(), ModuleKind::COUNT - 1);

    let ela = image::open(temp_dir.path().join("ela.png")).unwrap();
    assert_eq!((ela.width(), ela.height()), (64, 64));
    let fft = image::open(temp_dir.path().join("fft.png")).unwrap();
    assert_eq!((fft.width(), fft.height()), (512, 512));
}

#[test]
fn scoring_only_matches_full_run() {
    let pixels = textured(64, 64);
    let detector = AiImageDetector::new().with_config(sequential());

    let full = detector.analyze_pixels(&pixels, &[]).unwrap();
    let scored = detector.score_pixels(&pixels, &[]).unwrap();
    assert_eq!(full.aggregation, scored);
}

#[test]
fn config_override_file_changes_the_verdict() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{ "aggregator": { "thresholds": { "likely_ai": 0.0, "suspicious": 0.0, "min_ai_confidence": 0.0 } } }"#,
    )
    .unwrap();

    let config =
        AnalysisConfig::from_json(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    assert!(config.parallel);

    let result = AiImageDetector::new()
        .with_config(config)
        .analyze_pixels(&textured(32, 32), &[])
        .unwrap();
    assert_eq!(result.verdict, Verdict::LikelyAi);

    let report = JsonReport::from(&result).to_json().unwrap();
    assert!(report.contains("\"LikelyAI\""));
}
