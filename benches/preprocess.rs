use std::hint::black_box;

use coversearch::config::ExtractorOptions;
use coversearch::extractor::preprocess;
use criterion::{Criterion, criterion_group, criterion_main};
use image::{DynamicImage, RgbImage};
use rand::prelude::*;

fn bench_preprocess(c: &mut Criterion) {
    let mut rng = rand::rng();
    let mut raw = vec![0u8; 640 * 640 * 3];
    rng.fill_bytes(&mut raw);
    let image = DynamicImage::ImageRgb8(RgbImage::from_raw(640, 640, raw).unwrap());
    let opts = ExtractorOptions::default();

    c.bench_function("preprocess_640", |b| {
        b.iter(|| preprocess(black_box(&image), &opts).unwrap());
    });
}

criterion_group!(benches, bench_preprocess);
criterion_main!(benches);
