use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration;

use coldchain::crypto::{compute_root, generate_proof};
use coldchain::types::Sample;

// deterministic data
fn gen_samples(n: usize) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|i| {
            let mut s = Sample::new(
                "SHIP-BENCH",
                "BATCH-BENCH",
                rng.gen_range(-2500..1000),
                rng.gen_range(2000..9500),
            )
            .with_tag(format!("RFID-{}", i % 16));
            s.timestamp = 1_700_000_000_000 + i as u64;
            s
        })
        .collect()
}

fn bench_merkle_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_root");
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    for n in [10usize, 1_000, 10_000] {
        let samples = gen_samples(n);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("compute_root", n), &samples, |b, s| {
            b.iter(|| compute_root(black_box(s)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("generate_proof", n), &samples, |b, s| {
            b.iter(|| generate_proof(black_box(s), n / 2).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_merkle_root);
criterion_main!(benches);
