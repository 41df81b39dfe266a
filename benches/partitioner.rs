//! Partitioner benchmarks
//!
//! - Universe load, shuffle and split
//! - Train windows per epoch (window slicing + reshuffle)
//! - Order-restoring fetch against a storage-ordered store
//!
//! Toyota Way: Measure before optimizing (Genchi Genbutsu)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trueno_train::config::PartitionConfig;
use trueno_train::data::{DatasetPartitioner, MemoryDataStore, Phase};

fn store(n: u64) -> MemoryDataStore<u64, u64> {
    MemoryDataStore::from_records((0..n).map(|i| (i, i)))
}

fn config(block: usize) -> PartitionConfig {
    PartitionConfig::default()
        .split(80, 10, 10)
        .batch_size(32)
        .shuffle(true, block)
        .seed(42)
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioner_new");
    for n in [1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || store(n),
                |s| black_box(DatasetPartitioner::new(s, config(1)).unwrap()),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_epoch_windows");
    for block in [1usize, 64] {
        let mut p = DatasetPartitioner::new(store(50_000), config(block)).unwrap();
        group.bench_function(BenchmarkId::new("block", block), |b| {
            b.iter(|| {
                loop {
                    let window = p.next_batch(Phase::Train);
                    black_box(&window.ids);
                    if window.is_final {
                        break;
                    }
                }
                p.reset_epoch();
            });
        });
    }
    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let p = DatasetPartitioner::new(store(10_000), config(1)).unwrap();
    let ids: Vec<u64> = p.partition(Phase::Train)[..256].to_vec();

    c.bench_function("fetch_256_shuffled", |b| {
        b.iter(|| black_box(p.fetch(black_box(&ids)).unwrap()));
    });
}

criterion_group!(benches, bench_construction, bench_epoch, bench_fetch);
criterion_main!(benches);
