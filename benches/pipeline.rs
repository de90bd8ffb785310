use ai_image_forensics::{AiImageDetector, AnalysisConfig, raster::PixelBuffer};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn sample(size: u32) -> PixelBuffer {
    PixelBuffer::from_fn(size, size, |x, y| {
        let v = (x.wrapping_mul(31) ^ y.wrapping_mul(17)) as u8;
        [v, v.wrapping_add(40), 255 - v, 255]
    })
}

fn bench_pipeline(c: &mut Criterion) {
    let pixels = sample(256);
    let mut group = c.benchmark_group("pipeline_256");

    for parallel in [false, true] {
        let detector = AiImageDetector::new().with_config(AnalysisConfig {
            parallel,
            ..AnalysisConfig::default()
        });
        let label = if parallel { "parallel" } else { "sequential" };

        group.bench_function(format!("score_only_{label}"), |b| {
            b.iter(|| detector.score_pixels(black_box(&pixels), &[]))
        });
        group.bench_function(format!("with_visualization_{label}"), |b| {
            b.iter(|| detector.analyze_pixels(black_box(&pixels), &[]))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
