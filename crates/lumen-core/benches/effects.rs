//! Benchmarks for the filter effects and the file fetch path.
//!
//! Run with: cargo bench -p lumen-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{ImageFormat, Rgba, RgbaImage};
use lumen_core::config::FilterConfig;
use lumen_core::{Config, EffectKind, FetchStage, FilterStage, ImageBuffer};

fn frame() -> RgbaImage {
    RgbaImage::from_fn(1920, 1080, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255])
    })
}

fn benchmark_effects(c: &mut Criterion) {
    let input = frame();

    for effect in [
        EffectKind::Pixelate,
        EffectKind::Grayscale,
        EffectKind::Sepia,
        EffectKind::Invert,
    ] {
        let stage = FilterStage::new(&FilterConfig {
            effect,
            ..FilterConfig::default()
        });
        c.bench_function(&format!("{effect}_1080p"), |b| {
            b.iter(|| {
                let _ = stage.apply(black_box(ImageBuffer::new(input.clone())));
            })
        });
    }
}

fn benchmark_file_fetch(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    frame().save_with_format(&path, ImageFormat::Png).unwrap();
    let url = format!("file://{}", path.display());

    let stage = FetchStage::new(&Config::default()).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("fetch_decode_file_1080p", |b| {
        b.iter(|| {
            let _ = rt.block_on(stage.fetch(black_box(&url)));
        })
    });
}

criterion_group!(benches, benchmark_effects, benchmark_file_fetch);
criterion_main!(benches);
