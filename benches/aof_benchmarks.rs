use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;
use umarell::{AofLog, InPersistentStore, Storage, SyncPolicy};

/// append_set for varying value sizes under both sync policies.
fn bench_append_set(c: &mut Criterion) {
    for policy in [SyncPolicy::Always, SyncPolicy::No] {
        let mut group = c.benchmark_group(format!("append_set/{policy:?}"));
        for size in [16usize, 256, 4096] {
            group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &s| {
                let dir = TempDir::new().unwrap();
                let mut log = AofLog::open(dir.path().join("bench.aof"), policy).unwrap();
                let value = vec![b'v'; s];
                b.iter(|| log.append_set(b"channel", black_box(&value)).unwrap());
            });
        }
        group.finish();
    }
}

/// Reopening a store replays the whole log.
fn bench_reopen(c: &mut Criterion) {
    let mut group = c.benchmark_group("reopen");
    for records in [100usize, 1_000, 10_000] {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bench.aof");
        {
            let store = InPersistentStore::open(&path, SyncPolicy::No).unwrap();
            for i in 0..records {
                store
                    .set(&format!("chan.{}", i % 64), bytes::Bytes::from(i.to_string()))
                    .unwrap();
            }
        }
        group.bench_with_input(BenchmarkId::from_parameter(records), &records, |b, _| {
            b.iter(|| black_box(InPersistentStore::open(&path, SyncPolicy::No).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append_set, bench_reopen);
criterion_main!(benches);
