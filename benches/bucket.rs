use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;
use tricklenet::TokenBucket;

fn benchmark_wait_n(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("token_bucket");
    group.throughput(Throughput::Bytes(1024));

    // The fast path taken whenever throttling is disabled
    group.bench_function("wait_n_unlimited", |b| {
        let bucket = TokenBucket::new(TokenBucket::UNLIMITED, 1024);
        b.iter(|| rt.block_on(bucket.wait_n(black_box(1024), None)).unwrap());
    });

    // A rate so high the bucket refills between iterations, measuring the
    // grant path without any sleeping
    group.bench_function("wait_n_hot", |b| {
        let bucket = TokenBucket::new(1 << 40, 1024);
        b.iter(|| rt.block_on(bucket.wait_n(black_box(1024), None)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, benchmark_wait_n);
criterion_main!(benches);
