use criterion::{black_box, criterion_group, criterion_main, Criterion};
use filterstack::hash::{fast128, sha256_hex};

fn bench_hashing(c: &mut Criterion) {
    let small = b"attribute value";
    let large = vec![0u8; 1 << 16];

    c.bench_function("fast128 small", |b| b.iter(|| fast128(black_box(small))));
    c.bench_function("fast128 64KiB", |b| b.iter(|| fast128(black_box(&large))));
    c.bench_function("sha256_hex small", |b| b.iter(|| sha256_hex(black_box(small))));
    c.bench_function("sha256_hex 64KiB", |b| b.iter(|| sha256_hex(black_box(&large))));
}

criterion_group!(benches, bench_hashing);
criterion_main!(benches);
