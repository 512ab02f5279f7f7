//! Site store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sitesync_bench::{keys, payload};
use sitesync_protocol::Timestamp;
use sitesync_store::Store;
use tempfile::TempDir;

/// Benchmark single-row transactions by payload size.
fn bench_single_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_write");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = Store::open_in_memory().unwrap();
            let key = keys(1).remove(0);
            let data = payload(size);
            let mut ts = 0u64;

            b.iter(|| {
                ts += 1;
                store
                    .transaction(|txn| {
                        txn.put_row(
                            key.clone(),
                            black_box(data.clone()),
                            Timestamp::from_millis(ts),
                        );
                        Ok(())
                    })
                    .unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark one transaction committing a batch of rows.
fn bench_batch_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_commit");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let store = Store::open_in_memory().unwrap();
                let batch: Vec<_> = keys(batch_size)
                    .into_iter()
                    .map(|key| (key, payload(256)))
                    .collect();
                let mut ts = 0u64;

                b.iter(|| {
                    ts += 1;
                    store
                        .transaction(|txn| {
                            for (key, data) in &batch {
                                txn.put_row(
                                    key.clone(),
                                    black_box(data.clone()),
                                    Timestamp::from_millis(ts),
                                );
                            }
                            Ok(())
                        })
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark row lookups against a populated store.
fn bench_row_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_read");

    for population in [100, 10_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(population),
            population,
            |b, &population| {
                let store = Store::open_in_memory().unwrap();
                let all = keys(population);
                store
                    .transaction(|txn| {
                        for (i, key) in all.iter().enumerate() {
                            txn.put_row(
                                key.clone(),
                                payload(256),
                                Timestamp::from_millis(i as u64),
                            );
                        }
                        Ok(())
                    })
                    .unwrap();
                let probe = all[population / 2].clone();

                b.iter(|| {
                    let row = store.row(black_box(&probe));
                    black_box(row);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark recovery: reopening a store with a journal to replay.
fn bench_reopen_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("reopen_replay");
    group.sample_size(20);

    for frames in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(frames), frames, |b, &frames| {
            let dir = TempDir::new().unwrap();
            {
                let store = Store::open(dir.path()).unwrap();
                for (i, key) in keys(frames).into_iter().enumerate() {
                    store
                        .transaction(|txn| {
                            txn.put_row(key.clone(), payload(256), Timestamp::from_millis(i as u64));
                            Ok(())
                        })
                        .unwrap();
                }
            }

            b.iter(|| {
                let store = Store::open(dir.path()).unwrap();
                black_box(store.watermark());
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_write,
    bench_batch_commit,
    bench_row_read,
    bench_reopen_replay,
);

criterion_main!(benches);
