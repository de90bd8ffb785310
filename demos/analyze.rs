//! Full Detection Example
//!
//! Runs all seven heuristics on one image, prints the per-module breakdown and the JSON report,
//! and writes every visualization as a PNG.
//!
//! Run with: cargo run --example analyze -- <image_path> [output_dir] [config.json]

use ai_image_forensics::{
    AiImageDetector, AnalysisConfig, error::Result, report::JsonReport,
};
use std::env;
use std::fs;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("AI Image Forensics - Full Detection Example");
        println!("============================================");
        println!();
        println!("Usage: {} <image_path> [output_dir] [config.json]", args[0]);
        println!();
        println!("Arguments:");
        println!("  image_path   - Path to the image to analyze");
        println!("  output_dir   - Optional output directory (default: ./output)");
        println!("  config.json  - Optional partial configuration override");
        return Ok(());
    }

    let image_path = &args[1];
    let output_dir = args.get(2).map(|s| s.as_str()).unwrap_or("./output");

    if !Path::new(image_path).exists() {
        eprintln!("Error: Image file '{}' not found", image_path);
        std::process::exit(1);
    }

    let config = match args.get(3) {
        Some(path) => AnalysisConfig::from_json(&fs::read_to_string(path)?)?,
        None => AnalysisConfig::default(),
    };

    fs::create_dir_all(output_dir)?;

    let detector = AiImageDetector::new().with_config(config);
    let result = detector.analyze_path(image_path)?;

    println!("📁 {} ({} bytes, {})", result.file.name, result.file.size, result.file.mime_type);
    println!();
    println!("{:<10} {:>7} {:>8} {:>11}", "module", "score", "weight", "confidence");
    for (kind, module) in result.modules.iter() {
        println!(
            "{:<10} {:>7.3} {:>8.3} {:>11.3}",
            kind.name(),
            module.score,
            result.aggregation.weights[kind.index()],
            result.aggregation.module_confidences[kind.index()],
        );
    }
    println!();
    println!(
        "🔍 {} (overall {:.1}%, confidence {:.1}%)",
        result.verdict.label(),
        result.overall_score * 100.0,
        result.confidence * 100.0
    );

    for path in result.save_visualizations(output_dir)? {
        println!("   ✓ Saved {}", path.display());
    }

    let report_path = Path::new(output_dir).join("report.json");
    fs::write(&report_path, JsonReport::from(&result).to_json()?)?;
    println!("   ✓ Saved {}", report_path.display());

    Ok(())
}
