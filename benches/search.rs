use std::hint::black_box;

use coversearch::FlatIndex;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::prelude::*;

const DIM: usize = 2048;

fn random_index(rng: &mut impl Rng, n: usize) -> FlatIndex {
    let mut index = FlatIndex::new(DIM);
    let mut vector = vec![0f32; DIM];
    for _ in 0..n {
        vector.iter_mut().for_each(|v| *v = rng.random());
        index.add(&vector).unwrap();
    }
    index
}

fn bench_flat_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("FlatIndex");
    let mut rng = rand::rng();
    let query = (0..DIM).map(|_| rng.random()).collect::<Vec<f32>>();

    for n in [1_000, 10_000] {
        let index = random_index(&mut rng, n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("search_k10", n), &index, |b, index| {
            b.iter(|| index.search(black_box(&query), 10).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_flat_search);
criterion_main!(benches);
